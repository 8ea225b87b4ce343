use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

use distkv_common::{DEFAULT_HOST, DEFAULT_PORT, DEFAULT_SNAPSHOT_PATH, MAX_CONNECTIONS};
use distkv_server::{ServerContext, serve, spawn_autosave, spawn_sweeper};
use distkv_storage::{Db, load_snapshot};

#[derive(Parser, Debug)]
#[command(name = "distkv-server", about = "distkv: in-memory key-value store")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    max_connections: usize,
    #[arg(long, value_name = "FILE", default_value = DEFAULT_SNAPSHOT_PATH)]
    snapshot: PathBuf,
    /// Intervalo do snapshot periódico, em segundos.
    #[arg(long, value_name = "SECS")]
    save_interval: Option<u64>,
    /// Intervalo da varredura de chaves expiradas, em milissegundos.
    #[arg(long, value_name = "MS")]
    sweep_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "distkv_server=info,distkv_storage=info".into()),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    let db = Db::new();

    if args.snapshot.exists() {
        if let Err(e) = load_snapshot(&db, &args.snapshot).await {
            warn!("falha ao carregar snapshot {}: {e}", args.snapshot.display());
        }
    } else {
        info!("snapshot {} não existe, iniciando vazio", args.snapshot.display());
    }

    let ctx = ServerContext::new(db.clone(), args.snapshot.clone());

    if let Some(ms) = args.sweep_interval.filter(|&ms| ms > 0) {
        spawn_sweeper(db.clone(), Duration::from_millis(ms));
    }
    if let Some(secs) = args.save_interval.filter(|&s| s > 0) {
        spawn_autosave(ctx.clone(), Duration::from_secs(secs));
    }

    let listener = TcpListener::bind(&addr).await?;
    info!("distkv escutando em {addr}");

    serve(listener, ctx.clone(), args.max_connections, signal::ctrl_c()).await;

    match ctx.save().await {
        Ok(count) => info!("snapshot final gravado ({count} chaves)"),
        Err(e) => error!("falha ao gravar snapshot final: {e}"),
    }

    Ok(())
}
