use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tag do tipo de valor. O discriminante é o byte gravado no snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    String = 0,
    List = 1,
    Set = 2,
}

impl ValueKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ValueKind::String),
            1 => Some(ValueKind::List),
            2 => Some(ValueKind::Set),
            _ => None,
        }
    }
}

/// Tipo do valor armazenado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::List(_) => ValueKind::List,
            Value::Set(_) => ValueKind::Set,
        }
    }
}

/// Entrada no store: valor + expiração absoluta opcional (Unix ms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    pub expires_at: Option<i64>,
}

impl Entry {
    pub fn new(value: Value, expires_at: Option<i64>) -> Self {
        Self { value, expires_at }
    }

    /// Expirada quando o instante de expiração já foi alcançado (`<=`).
    ///
    /// O limite é inclusivo, e não estrito (`<`): com resolução de ms uma
    /// comparação estrita deixaria `EXPIRE k 0` visível até o próximo
    /// milissegundo, e a chave precisa sumir já no próximo acesso.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|t| t <= now_ms)
    }
}

/// Relógio de parede em milissegundos desde a época Unix.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
