use std::env;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let mut args = env::args().skip(1);
    let cmd = args.next().unwrap_or_default();
    if cmd != "serve" {
        eprintln!("Usage: cqbridge serve --config <path>");
        std::process::exit(2);
    }

    let mut config_path = String::from("./config/example-config.yaml");
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(v) = args.next() {
                config_path = v;
            }
        }
    }

    let cfg = match cqbridge_config::load_and_validate(&config_path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured filter.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!(config = %config_path, bots = cfg.bots.len(), "starting cqbridge");

    if let Err(e) = cqbridge_server::serve(cfg).await {
        tracing::error!(error = %e, "server exited with error");
        eprintln!("server exited with error: {e}");
        std::process::exit(1);
    }
}
