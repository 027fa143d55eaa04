fn main() -> anyhow::Result<()> {
    let code = fleetmaster::fm::main()?;
    std::process::exit(code);
}
