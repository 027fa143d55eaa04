pub mod fm;
