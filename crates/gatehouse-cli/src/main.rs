mod app;
mod args;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Args, Command};
use gatehouse_types::GatewayConfig;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mode = args.mode();
    init_tracing(mode);

    let config_path = args.config.unwrap_or_else(GatewayConfig::default_path);
    let config = match GatewayConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        config = %config_path.display(),
        upstreams = config.upstreams.len(),
        "starting gatehouse"
    );

    if let Err(e) = app::run(config, mode).await {
        tracing::error!(error = %e, "gateway failed");
        std::process::exit(1);
    }
}

fn init_tracing(mode: Command) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if mode == Command::Stdio {
        // stdout carries protocol frames in stdio mode.
        builder.with_writer(std::io::stderr).init();
    } else {
        builder.init();
    }
}
