use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, error, info};

use distkv_storage::Db;

use crate::{Connection, ServerContext, handle_connection};

/// Aceita conexões até `shutdown` completar. Cada conexão roda na própria task,
/// limitado a `max_connections` simultâneas.
pub async fn serve(
    listener: TcpListener,
    ctx: ServerContext,
    max_connections: usize,
    shutdown: impl Future,
) {
    let semaphore = Arc::new(Semaphore::new(max_connections));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    tokio::pin!(shutdown);

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = &mut shutdown => {
                info!("shutdown signal recebido");
                break;
            }
        };

        let (socket, addr) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        error!("erro ao aceitar conexão: {e}");
                        continue;
                    }
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal recebido");
                break;
            }
        };

        info!("nova conexão: {addr}");
        let ctx = ctx.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let conn = Connection::new(socket);
            if let Err(e) = handle_connection(conn, ctx, &mut shutdown_rx).await {
                error!("erro na conexão {addr}: {e}");
            }
            info!("conexão encerrada: {addr}");
            drop(permit);
        });
    }

    // Avisa as conexões abertas
    let _ = shutdown_tx.send(());
}

/// Varredura ativa de chaves expiradas a cada `period`.
pub fn spawn_sweeper(db: Db, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let removed = db.purge_expired();
            if removed > 0 {
                debug!("varredura removeu {removed} chaves expiradas");
            }
        }
    })
}

/// Snapshot periódico: grava a cada `period` se houve escrita desde o último.
pub fn spawn_autosave(ctx: ServerContext, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // O primeiro tick é imediato
        tick.tick().await;
        loop {
            tick.tick().await;
            if let Err(e) = ctx.save_if_dirty().await {
                error!("snapshot periódico falhou: {e}");
            }
        }
    })
}
