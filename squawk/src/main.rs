use clap::Parser;
use squawk::SquawkArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = SquawkArgs::parse();
    args.run().await?;
    Ok(())
}
