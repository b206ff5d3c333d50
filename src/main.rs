use anyhow::Result;

fn main() -> Result<()> {
    clipvault::cli::run()
}
