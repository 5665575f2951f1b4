use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use clockhub::config::{ServerConfig, USAGE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print!("{}", USAGE);
        return Ok(());
    }

    let config = match ServerConfig::from_env_and_args(&args) {
        Ok(c) => c,
        Err(e) => {
            error!(target: "clockhub", "{}", e);
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "clockhub",
        "clockhub starting: RUST_LOG='{}', http_port={}, data_dir={:?}",
        rust_log, config.http_port, config.data_dir
    );

    clockhub::server::run(config).await
}
