/*!
Autorité registre factice servie en local, pour faire tourner un hub sans backend.
*/

use anyhow::Result;
use clap::Parser;
use vigil_devkit::MockRegistry;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, env = "MOCK_REGISTRY_ADDR", default_value = "127.0.0.1:8001")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mock = MockRegistry::start_on(&args.addr).await?;
    log::info!("🚀 mock registry authority on {}", mock.url());
    mock.wait().await
}
