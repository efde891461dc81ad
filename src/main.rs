use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use token_keeper::catalog::Catalog;
use token_keeper::registry::Registry;
use token_keeper::server;
use token_keeper::store::StoreBackend;
use token_keeper::utils::logging::{init_logging, LogFormat, LogLevel};

#[derive(Debug, Parser)]
#[command(version, about = "Multi-tenant credential refresh service")]
struct Args {
    /// HTTP port for the registration/query API
    #[arg(short, long, env = "TOKEN_KEEPER_PORT", default_value_t = 9001)]
    port: u16,

    /// Directory holding per-tenant store files
    #[arg(long, env = "TOKEN_KEEPER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Base URL of the remote token-issuing service
    #[arg(long, env = "TOKEN_KEEPER_API_BASE")]
    api_base: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::INFO)]
    log_level: LogLevel,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_level, args.log_format);

    let backend = StoreBackend::file(&args.data_dir)?;
    let catalog = match &args.api_base {
        Some(base) => Catalog::new(base),
        None => Catalog::default(),
    };

    let registry = Arc::new(Registry::new(backend, catalog));
    registry.recover().await;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    server::start(addr, registry).await
}
