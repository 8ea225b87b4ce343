/// Erros de armazenamento/engine de dados.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("operação contra chave com tipo errado")]
    WrongType,
}

/// Erros do codec de snapshot (serialização binária do store).
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O no snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot truncado: precisava de {needed} bytes, restavam {remaining}")]
    Truncated { needed: usize, remaining: usize },
    #[error("tag de tipo desconhecida: {0}")]
    UnknownTypeTag(u8),
    #[error("comprimento não cabe na plataforma: {0}")]
    LengthOverflow(u64),
    #[error("{0} bytes sobrando após o último registro")]
    TrailingBytes(usize),
}

/// Erros de conexão TCP.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("conexão resetada pelo peer")]
    ConnectionReset,
    #[error("linha excede tamanho máximo ({0} bytes)")]
    LineTooLong(usize),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Erros de parsing/validação de comandos.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("comando vazio")]
    Empty,
    #[error("número errado de argumentos para '{0}'")]
    WrongArity(String),
    #[error("inteiro inválido: {0}")]
    InvalidInteger(String),
    #[error("aspas não balanceadas")]
    UnbalancedQuotes,
}

/// Erro top-level do DistKV.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Result type alias.
pub type KvResult<T> = Result<T, KvError>;
