use clap::Parser;
use filterjoin::{config, server};

/// Filterjoin - filter-join coordination for search backends
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// HTTP server host address
    #[arg(long, default_value = "0.0.0.0")]
    http_host: String,

    /// HTTP server port
    #[arg(long, default_value_t = 8080)]
    http_port: u16,

    /// Base URL of the upstream search backend
    #[arg(long)]
    upstream_url: Option<String>,

    /// Value-set bound for joins without an explicit size
    #[arg(long, default_value_t = 50_000)]
    default_lookup_size: usize,
}

impl From<Cli> for config::CliConfig {
    fn from(cli: Cli) -> Self {
        config::CliConfig {
            http_host: cli.http_host,
            http_port: cli.http_port,
            upstream_url: cli.upstream_url,
            default_lookup_size: cli.default_lookup_size,
        }
    }
}

#[tokio::main]
async fn main() {
    // Defaults to INFO level, can be overridden with RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    println!("\nFilterjoin v{}\n", env!("CARGO_PKG_VERSION"));

    let cli_config: config::CliConfig = cli.into();
    let config = match config::ServerConfig::from_cli(cli_config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    server::run_with_config(config).await;
}
