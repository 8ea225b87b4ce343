//! Snapshot binário do store.
//!
//! Layout (little-endian, `expires_at` em ms Unix, `-1` = sem expiração):
//!
//! ```text
//! u64 record_count
//! repete record_count vezes:
//!   u64 key_len; key
//!   u8  type_tag          (0=String, 1=List, 2=Set)
//!   i64 expires_at
//!   String: u64 len; bytes
//!   List:   u64 count; count × (u64 len; bytes)   na ordem da lista
//!   Set:    u64 count; count × (u64 len; bytes)   ordem qualquer
//! ```
//!
//! A gravação não é atômica em caso de crash (sem arquivo temporário + rename).

use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use distkv_common::SnapshotError;

use crate::Db;
use crate::entry::{Entry, Value, ValueKind, now_millis};

const NO_EXPIRY: i64 = -1;

/// Serializa todas as chaves não expiradas.
///
/// Segura o lock exclusivo durante a varredura inteira, então o resultado é
/// uma visão consistente no tempo mesmo com escritores concorrentes.
pub fn encode_snapshot(db: &Db) -> Bytes {
    db.with_exclusive(|data| {
        let now = now_millis();
        let live: Vec<_> = data
            .iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .collect();

        let mut buf = BytesMut::new();
        buf.put_u64_le(live.len() as u64);

        for (key, entry) in live {
            put_bytes(&mut buf, key);
            buf.put_u8(entry.value.kind().tag());
            buf.put_i64_le(entry.expires_at.unwrap_or(NO_EXPIRY));

            match &entry.value {
                Value::String(s) => put_bytes(&mut buf, s),
                Value::List(list) => {
                    buf.put_u64_le(list.len() as u64);
                    for item in list {
                        put_bytes(&mut buf, item);
                    }
                }
                Value::Set(set) => {
                    buf.put_u64_le(set.len() as u64);
                    for item in set {
                        put_bytes(&mut buf, item);
                    }
                }
            }
        }

        buf.freeze()
    })
}

/// Decodifica um snapshot completo. Não toca em nenhum store: quem chama
/// decide quando substituir o conteúdo.
pub fn decode_snapshot(src: &[u8]) -> Result<Vec<(Bytes, Entry)>, SnapshotError> {
    let mut cursor = Cursor::new(src);
    let count = get_len(&mut cursor)?;
    let mut records = Vec::new();

    for _ in 0..count {
        let key = get_bytes(&mut cursor)?;
        let tag = get_u8(&mut cursor)?;
        let kind = ValueKind::from_tag(tag).ok_or(SnapshotError::UnknownTypeTag(tag))?;
        let expires_at = match get_i64(&mut cursor)? {
            NO_EXPIRY => None,
            at => Some(at),
        };

        let value = match kind {
            ValueKind::String => Value::String(get_bytes(&mut cursor)?),
            ValueKind::List => {
                let n = get_len(&mut cursor)?;
                let mut list = VecDeque::new();
                for _ in 0..n {
                    list.push_back(get_bytes(&mut cursor)?);
                }
                Value::List(list)
            }
            ValueKind::Set => {
                let n = get_len(&mut cursor)?;
                let mut set = HashSet::new();
                for _ in 0..n {
                    set.insert(get_bytes(&mut cursor)?);
                }
                Value::Set(set)
            }
        };

        records.push((key, Entry::new(value, expires_at)));
    }

    if cursor.has_remaining() {
        return Err(SnapshotError::TrailingBytes(cursor.remaining()));
    }

    Ok(records)
}

/// Grava o snapshot em `path`. Retorna o número de registros gravados.
pub async fn save_snapshot(db: &Db, path: &Path) -> Result<usize, SnapshotError> {
    let data = encode_snapshot(db);
    let count = record_count(&data);

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(path).await?;
    file.write_all(&data).await?;
    file.flush().await?;
    file.sync_data().await?;

    info!("snapshot salvo em {:?} ({count} chaves, {} bytes)", path, data.len());
    Ok(count)
}

/// Lê `path` e substitui todo o conteúdo do store.
///
/// O arquivo é decodificado inteiro antes de tocar no store: se a leitura ou
/// a decodificação falhar, o conteúdo anterior fica intacto. Chaves cujo TTL
/// já passou são admitidas e deixadas para a expiração lazy.
pub async fn load_snapshot(db: &Db, path: &Path) -> Result<usize, SnapshotError> {
    let data = fs::read(path).await?;
    let records = decode_snapshot(&data)?;
    let count = records.len();

    let now = now_millis();
    let stale = records
        .iter()
        .filter(|(_, entry)| entry.is_expired_at(now))
        .count();
    if stale > 0 {
        debug!("snapshot contém {stale} chaves já expiradas");
    }

    db.replace(records);
    info!("snapshot carregado de {:?} ({count} chaves)", path);
    Ok(count)
}

fn record_count(data: &[u8]) -> usize {
    let mut cursor = Cursor::new(data);
    get_len(&mut cursor).unwrap_or(0)
}

fn put_bytes(dst: &mut BytesMut, data: &[u8]) {
    dst.put_u64_le(data.len() as u64);
    dst.put_slice(data);
}

fn ensure(src: &Cursor<&[u8]>, needed: usize) -> Result<(), SnapshotError> {
    if src.remaining() < needed {
        return Err(SnapshotError::Truncated {
            needed,
            remaining: src.remaining(),
        });
    }
    Ok(())
}

fn get_u8(src: &mut Cursor<&[u8]>) -> Result<u8, SnapshotError> {
    ensure(src, 1)?;
    Ok(src.get_u8())
}

fn get_i64(src: &mut Cursor<&[u8]>) -> Result<i64, SnapshotError> {
    ensure(src, 8)?;
    Ok(src.get_i64_le())
}

fn get_len(src: &mut Cursor<&[u8]>) -> Result<usize, SnapshotError> {
    ensure(src, 8)?;
    let n = src.get_u64_le();
    usize::try_from(n).map_err(|_| SnapshotError::LengthOverflow(n))
}

fn get_bytes(src: &mut Cursor<&[u8]>) -> Result<Bytes, SnapshotError> {
    let len = get_len(src)?;
    ensure(src, len)?;
    Ok(src.copy_to_bytes(len))
}
