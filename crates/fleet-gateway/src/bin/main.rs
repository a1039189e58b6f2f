//! Fleet observability gateway executable.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fleet_common::Config;
use fleet_gateway::{init_gateway, start_server};

#[derive(Parser, Debug)]
#[command(name = "fleet-gateway", version, about = "Container-fleet observability and remediation gateway")]
struct Cli {
    /// Override the bind address from config (e.g. 0.0.0.0:8080)
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable debug-level logging regardless of RUST_LOG
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_env()?;
    let bind_addr = cli.bind.unwrap_or_else(|| format!("{}:{}", config.gateway.bind_address, config.gateway.port));

    info!(version = env!("CARGO_PKG_VERSION"), bind_addr = %bind_addr, "starting fleet gateway");

    let gateway = match init_gateway(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!(error = %e, "failed to initialize gateway");
            std::process::exit(1);
        }
    };

    if let Err(e) = start_server(gateway, &bind_addr).await {
        error!(error = %e, "server exited with an error");
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fleet_gateway={default_level},fleet_cycle={default_level}")));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}
