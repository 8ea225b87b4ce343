#![forbid(unsafe_code)]

mod db;
mod entry;
pub mod snapshot;

pub use db::Db;
pub use entry::{Entry, Value, ValueKind, now_millis};
pub use snapshot::{decode_snapshot, encode_snapshot, load_snapshot, save_snapshot};
