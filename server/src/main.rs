use anyhow::Result;
use axum::Router;
use clap::Parser;
use gapidx_core::{BooleanMode, Bm25Params, RankingMode};
use gapidx_server::{build_app, ServerConfig};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Ranking used when a request does not name one (tfidf or bm25)
    #[arg(long, default_value = "bm25")]
    ranking: RankingMode,
    /// Boolean mode used when a request does not name one (and or or)
    #[arg(long, default_value = "or")]
    mode: BooleanMode,
    #[arg(long, default_value_t = 1.5)]
    k1: f64,
    #[arg(long, default_value_t = 0.75)]
    b: f64,
    /// Largest result page a request may ask for
    #[arg(long, default_value_t = 100)]
    max_k: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();
    let config = ServerConfig {
        index_dir: args.index.into(),
        bm25: Bm25Params::new(args.k1, args.b)?,
        default_ranking: args.ranking,
        default_mode: args.mode,
        max_k: args.max_k,
    };
    let app: Router = build_app(&config)?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
