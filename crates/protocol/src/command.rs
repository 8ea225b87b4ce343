use bytes::Bytes;
use distkv_common::CommandError;

use crate::Parse;

/// Enum com todos os comandos suportados.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping(Option<Bytes>),
    Echo(Bytes),
    Get(Bytes),
    Set { key: Bytes, value: Bytes },
    Del(Bytes),
    Exists(Bytes),
    Expire { key: Bytes, seconds: i64 },
    Ttl(Bytes),
    Persist(Bytes),
    Keys,
    DbSize,
    FlushDb,
    LPush { key: Bytes, value: Bytes },
    RPush { key: Bytes, value: Bytes },
    LPop(Bytes),
    RPop(Bytes),
    LRange { key: Bytes, start: i64, stop: i64 },
    LLen(Bytes),
    SAdd { key: Bytes, member: Bytes },
    SRem { key: Bytes, member: Bytes },
    SIsMember { key: Bytes, member: Bytes },
    SMembers(Bytes),
    SCard(Bytes),
    Save,
    Quit,
    Unknown(String),
}

impl Command {
    /// Faz o parse de uma linha de requisição (sem o terminador) em um Command.
    pub fn from_line(line: &[u8]) -> Result<Command, CommandError> {
        let mut parse = Parse::new(line)?;
        let name = parse.command().to_string();

        let cmd = match name.as_str() {
            "PING" => {
                let msg = if parse.has_remaining() {
                    Some(parse.next_bytes()?)
                } else {
                    None
                };
                Command::Ping(msg)
            }
            "ECHO" => Command::Echo(parse.next_bytes()?),
            "GET" => Command::Get(parse.next_bytes()?),
            "SET" => Command::Set {
                key: parse.next_bytes()?,
                value: parse.next_bytes()?,
            },
            "DEL" => Command::Del(parse.next_bytes()?),
            "EXISTS" => Command::Exists(parse.next_bytes()?),
            "EXPIRE" => Command::Expire {
                key: parse.next_bytes()?,
                seconds: parse.next_int()?,
            },
            "TTL" => Command::Ttl(parse.next_bytes()?),
            "PERSIST" => Command::Persist(parse.next_bytes()?),
            "KEYS" => Command::Keys,
            "DBSIZE" => Command::DbSize,
            "FLUSHDB" => Command::FlushDb,
            "LPUSH" => Command::LPush {
                key: parse.next_bytes()?,
                value: parse.next_bytes()?,
            },
            "RPUSH" => Command::RPush {
                key: parse.next_bytes()?,
                value: parse.next_bytes()?,
            },
            "LPOP" => Command::LPop(parse.next_bytes()?),
            "RPOP" => Command::RPop(parse.next_bytes()?),
            "LRANGE" => Command::LRange {
                key: parse.next_bytes()?,
                start: parse.next_int()?,
                stop: parse.next_int()?,
            },
            "LLEN" => Command::LLen(parse.next_bytes()?),
            "SADD" => Command::SAdd {
                key: parse.next_bytes()?,
                member: parse.next_bytes()?,
            },
            "SREM" => Command::SRem {
                key: parse.next_bytes()?,
                member: parse.next_bytes()?,
            },
            "SISMEMBER" => Command::SIsMember {
                key: parse.next_bytes()?,
                member: parse.next_bytes()?,
            },
            "SMEMBERS" => Command::SMembers(parse.next_bytes()?),
            "SCARD" => Command::SCard(parse.next_bytes()?),
            "SAVE" => Command::Save,
            "QUIT" => Command::Quit,
            // Argumentos de comando desconhecido são ignorados
            other => return Ok(Command::Unknown(other.to_string())),
        };

        parse.finish()?;
        Ok(cmd)
    }

    /// Comandos que alteram o store.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Set { .. }
                | Command::Del(_)
                | Command::Expire { .. }
                | Command::Persist(_)
                | Command::FlushDb
                | Command::LPush { .. }
                | Command::RPush { .. }
                | Command::LPop(_)
                | Command::RPop(_)
                | Command::SAdd { .. }
                | Command::SRem { .. }
        )
    }
}
