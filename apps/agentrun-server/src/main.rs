use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "agentrun-server", about = "HTTP control plane for durable agent runs")]
struct Args {
    #[arg(long, default_value = "configs/agentrun.yaml")]
    config: PathBuf,
    /// Overrides `server.listen` from the config file
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    agentrun_server::run_server(args.config, args.listen).await
}
