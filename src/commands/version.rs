use anyhow::Result;

pub fn run() -> Result<()> {
    println!("right-sizer {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
