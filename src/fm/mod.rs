pub mod build_info;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod names;
pub mod nodes;
pub mod options;
pub mod pidfile;
pub mod process;
pub mod supervisor;
pub mod terminal;

pub fn main() -> anyhow::Result<i32> {
    cli::run()
}
