use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error};

use distkv_common::{KvResult, SnapshotError, StorageError};
use distkv_protocol::{Command, Reply};
use distkv_storage::{Db, save_snapshot};

use crate::Connection;

/// Estado compartilhado por todas as conexões.
#[derive(Clone)]
pub struct ServerContext {
    pub db: Db,
    pub snapshot_path: PathBuf,
    /// Escritas bem-sucedidas desde o último snapshot.
    pub dirty: Arc<AtomicU64>,
    /// SAVE, autosave e o save do shutdown gravam o mesmo arquivo.
    save_lock: Arc<Mutex<()>>,
}

impl ServerContext {
    pub fn new(db: Db, snapshot_path: PathBuf) -> Self {
        Self {
            db,
            snapshot_path,
            dirty: Arc::new(AtomicU64::new(0)),
            save_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Executa um comando e conta as escritas que tiveram efeito.
    pub fn apply(&self, cmd: &Command) -> Reply {
        let response = execute_command(cmd, &self.db);
        if cmd.is_write() && !matches!(response, Reply::Error(_)) {
            self.dirty.fetch_add(1, Ordering::AcqRel);
        }
        response
    }

    /// Grava o snapshot e desconta as escritas que ele cobriu.
    pub async fn save(&self) -> Result<usize, SnapshotError> {
        let _guard = self.save_lock.lock().await;
        let pending = self.dirty.load(Ordering::Acquire);
        let count = save_snapshot(&self.db, &self.snapshot_path).await?;
        self.dirty.fetch_sub(pending, Ordering::AcqRel);
        Ok(count)
    }

    /// Grava só se houve escrita desde o último snapshot.
    pub async fn save_if_dirty(&self) -> Result<Option<usize>, SnapshotError> {
        if self.dirty.load(Ordering::Acquire) == 0 {
            return Ok(None);
        }
        self.save().await.map(Some)
    }
}

/// Loop principal de tratamento de uma conexão.
pub async fn handle_connection(
    mut conn: Connection,
    ctx: ServerContext,
    shutdown: &mut broadcast::Receiver<()>,
) -> KvResult<()> {
    loop {
        let line = tokio::select! {
            result = conn.read_line() => result?,
            _ = shutdown.recv() => {
                return Ok(());
            }
        };

        let line = match line {
            Some(l) => l,
            None => return Ok(()), // EOF
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let cmd = match Command::from_line(&line) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("requisição inválida: {e}");
                conn.write_reply(&Reply::error(e)).await?;
                continue;
            }
        };

        debug!("comando recebido: {cmd:?}");

        let response = match cmd {
            Command::Quit => {
                conn.write_reply(&Reply::ok()).await?;
                return Ok(());
            }
            Command::Save => match ctx.save().await {
                Ok(_) => Reply::ok(),
                Err(e) => {
                    error!("SAVE falhou: {e}");
                    Reply::error(e)
                }
            },
            _ => ctx.apply(&cmd),
        };

        conn.write_reply(&response).await?;
    }
}

/// Executa um comando contra o store e retorna a resposta.
pub fn execute_command(cmd: &Command, db: &Db) -> Reply {
    match cmd {
        Command::Ping(msg) => match msg {
            Some(m) => Reply::Bulk(m.clone()),
            None => Reply::Simple("PONG".into()),
        },
        Command::Echo(msg) => Reply::Bulk(msg.clone()),
        Command::Get(key) => match db.get(key) {
            Some(value) => Reply::Bulk(value),
            None => Reply::Null,
        },
        Command::Set { key, value } => {
            db.set(key.clone(), value.clone());
            Reply::ok()
        }
        Command::Del(key) => Reply::from_bool(db.del(key)),
        Command::Exists(key) => Reply::from_bool(db.exists(key)),
        Command::Expire { key, seconds } => Reply::from_bool(db.expire(key, *seconds)),
        Command::Ttl(key) => Reply::Integer(db.ttl(key)),
        Command::Persist(key) => Reply::from_bool(db.persist(key)),
        Command::Keys => {
            let mut keys = db.keys();
            keys.sort();
            Reply::bulk_array(keys)
        }
        Command::DbSize => Reply::Integer(db.len() as i64),
        Command::FlushDb => {
            db.clear();
            Reply::ok()
        }
        Command::LPush { key, value } => {
            storage_reply(db.lpush(key.clone(), value.clone()), |len| {
                Reply::Integer(len as i64)
            })
        }
        Command::RPush { key, value } => {
            storage_reply(db.rpush(key.clone(), value.clone()), |len| {
                Reply::Integer(len as i64)
            })
        }
        Command::LPop(key) => storage_reply(db.lpop(key), bulk_or_null),
        Command::RPop(key) => storage_reply(db.rpop(key), bulk_or_null),
        Command::LRange { key, start, stop } => {
            storage_reply(db.lrange(key, *start, *stop), |items| {
                Reply::bulk_array(items.unwrap_or_default())
            })
        }
        Command::LLen(key) => Reply::Integer(db.llen(key) as i64),
        Command::SAdd { key, member } => {
            storage_reply(db.sadd(key.clone(), member.clone()), Reply::from_bool)
        }
        Command::SRem { key, member } => storage_reply(db.srem(key, member), Reply::from_bool),
        Command::SIsMember { key, member } => {
            storage_reply(db.sismember(key, member), Reply::from_bool)
        }
        Command::SMembers(key) => storage_reply(db.smembers(key), |members| {
            let mut members: Vec<_> = members.unwrap_or_default().into_iter().collect();
            members.sort();
            Reply::bulk_array(members)
        }),
        Command::SCard(key) => Reply::Integer(db.scard(key) as i64),
        Command::Unknown(name) => Reply::error(format!("unknown command '{name}'")),
        Command::Save | Command::Quit => unreachable!("tratado em handle_connection"),
    }
}

fn storage_reply<T>(result: Result<T, StorageError>, ok: impl FnOnce(T) -> Reply) -> Reply {
    match result {
        Ok(value) => ok(value),
        Err(StorageError::WrongType) => Reply::wrong_type(),
    }
}

fn bulk_or_null(value: Option<bytes::Bytes>) -> Reply {
    value.map(Reply::Bulk).unwrap_or(Reply::Null)
}
