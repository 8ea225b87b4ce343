use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use distkv_common::StorageError;

use crate::entry::{Entry, Value, now_millis};

pub(crate) type DataMap = HashMap<Bytes, Entry>;

/// Estado compartilhado entre todas as conexões.
/// Um único RwLock protege o mapa inteiro: leituras em paralelo,
/// qualquer criação/mutação/remoção em exclusivo.
#[derive(Default)]
struct SharedState {
    data: RwLock<DataMap>,
}

/// Handle para o banco de dados in-memory.
#[derive(Clone, Default)]
pub struct Db {
    shared: Arc<SharedState>,
}

impl Db {
    pub fn new() -> Self {
        Self::default()
    }

    // --- Operações genéricas ---

    /// Sobrescreve a chave como string sem expiração, descartando o tipo anterior.
    pub fn set(&self, key: Bytes, value: Bytes) {
        let mut data = self.shared.data.write();
        data.insert(key, Entry::new(Value::String(value), None));
    }

    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::String(data) => Some(data.clone()),
            _ => None,
        })
        .flatten()
    }

    /// Remove a chave independente do tipo ou de já ter expirado.
    pub fn del(&self, key: &[u8]) -> bool {
        self.shared.data.write().remove(key).is_some()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.read_live(key, now_millis(), |_| ()).is_some()
    }

    /// Define `expires_at = agora + seconds`. Zero ou negativo expira a chave
    /// no próximo acesso.
    pub fn expire(&self, key: &[u8], seconds: i64) -> bool {
        let now = now_millis();
        let mut data = self.shared.data.write();
        match live_mut(&mut data, key, now) {
            Some(entry) => {
                entry.expires_at = Some(now.saturating_add(seconds.saturating_mul(1000)));
                true
            }
            None => false,
        }
    }

    /// Remove a expiração. Retorna false se a chave não existe ou não expirava.
    pub fn persist(&self, key: &[u8]) -> bool {
        let now = now_millis();
        let mut data = self.shared.data.write();
        match live_mut(&mut data, key, now) {
            Some(entry) => entry.expires_at.take().is_some(),
            None => false,
        }
    }

    /// Segundos restantes (arredondado para cima), `-1` sem expiração,
    /// `-2` se a chave não existe ou já expirou.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        let now = now_millis();
        self.read_live(key, now, |entry| match entry.expires_at {
            None => -1,
            Some(at) => (at - now + 999) / 1000,
        })
        .unwrap_or(-2)
    }

    /// Todas as chaves não expiradas. Não faz limpeza: expiradas são apenas filtradas.
    pub fn keys(&self) -> Vec<Bytes> {
        let now = now_millis();
        let data = self.shared.data.read();
        data.iter()
            .filter(|(_, entry)| !entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Número de entradas fisicamente presentes, incluindo as expiradas
    /// que ainda não foram varridas.
    pub fn len(&self) -> usize {
        self.shared.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.shared.data.write().clear();
    }

    /// Varredura ativa: remove todas as chaves expiradas pelo mesmo caminho
    /// da expiração lazy. Retorna quantas foram removidas.
    pub fn purge_expired(&self) -> usize {
        let now = now_millis();
        let mut data = self.shared.data.write();
        let expired: Vec<Bytes> = data
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .iter()
            .filter(|key| remove_if_expired(&mut data, key, now))
            .count()
    }

    // --- Operações de lista ---

    pub fn lpush(&self, key: Bytes, value: Bytes) -> Result<usize, StorageError> {
        self.list_push(key, value, true)
    }

    pub fn rpush(&self, key: Bytes, value: Bytes) -> Result<usize, StorageError> {
        self.list_push(key, value, false)
    }

    fn list_push(&self, key: Bytes, value: Bytes, to_left: bool) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut data = self.shared.data.write();
        remove_if_expired(&mut data, &key, now);

        let entry = data
            .entry(key)
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new()), None));

        match &mut entry.value {
            Value::List(list) => {
                if to_left {
                    list.push_front(value);
                } else {
                    list.push_back(value);
                }
                Ok(list.len())
            }
            _ => Err(StorageError::WrongType),
        }
    }

    pub fn lpop(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        self.list_pop(key, true)
    }

    pub fn rpop(&self, key: &[u8]) -> Result<Option<Bytes>, StorageError> {
        self.list_pop(key, false)
    }

    fn list_pop(&self, key: &[u8], from_left: bool) -> Result<Option<Bytes>, StorageError> {
        let now = now_millis();
        let mut data = self.shared.data.write();
        let Some(entry) = live_mut(&mut data, key, now) else {
            return Ok(None);
        };

        // Lista vazia continua existindo: só DEL, expiração ou load removem a chave
        match &mut entry.value {
            Value::List(list) if from_left => Ok(list.pop_front()),
            Value::List(list) => Ok(list.pop_back()),
            _ => Err(StorageError::WrongType),
        }
    }

    /// Faixa inclusiva `[start, stop]`; índices negativos contam a partir do fim
    /// e ambos são grampeados em `[0, len-1]`.
    pub fn lrange(
        &self,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Option<Vec<Bytes>>, StorageError> {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::List(list) => Ok(slice_range(list, start, stop)),
            _ => Err(StorageError::WrongType),
        })
        .transpose()
    }

    /// `0` se a chave não existe ou não é lista.
    pub fn llen(&self, key: &[u8]) -> usize {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::List(list) => list.len(),
            _ => 0,
        })
        .unwrap_or(0)
    }

    // --- Operações de set ---

    /// Retorna true se o membro foi inserido agora.
    pub fn sadd(&self, key: Bytes, member: Bytes) -> Result<bool, StorageError> {
        let now = now_millis();
        let mut data = self.shared.data.write();
        remove_if_expired(&mut data, &key, now);

        let entry = data
            .entry(key)
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new()), None));

        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member)),
            _ => Err(StorageError::WrongType),
        }
    }

    pub fn srem(&self, key: &[u8], member: &[u8]) -> Result<bool, StorageError> {
        let now = now_millis();
        let mut data = self.shared.data.write();
        let Some(entry) = live_mut(&mut data, key, now) else {
            return Ok(false);
        };

        match &mut entry.value {
            Value::Set(set) => Ok(set.remove(member)),
            _ => Err(StorageError::WrongType),
        }
    }

    pub fn sismember(&self, key: &[u8], member: &[u8]) -> Result<bool, StorageError> {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::Set(set) => Ok(set.contains(member)),
            _ => Err(StorageError::WrongType),
        })
        .unwrap_or(Ok(false))
    }

    pub fn smembers(&self, key: &[u8]) -> Result<Option<HashSet<Bytes>>, StorageError> {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::Set(set) => Ok(set.clone()),
            _ => Err(StorageError::WrongType),
        })
        .transpose()
    }

    /// `0` se a chave não existe ou não é set.
    pub fn scard(&self, key: &[u8]) -> usize {
        self.read_live(key, now_millis(), |entry| match &entry.value {
            Value::Set(set) => set.len(),
            _ => 0,
        })
        .unwrap_or(0)
    }

    // --- Suporte ao snapshot ---

    /// Executa `f` segurando o lock exclusivo durante toda a chamada.
    pub(crate) fn with_exclusive<R>(&self, f: impl FnOnce(&mut DataMap) -> R) -> R {
        let mut data = self.shared.data.write();
        f(&mut data)
    }

    /// Substitui todo o conteúdo (clear + repopulate, nunca merge).
    pub fn replace(&self, entries: Vec<(Bytes, Entry)>) {
        self.with_exclusive(|data| {
            data.clear();
            data.extend(entries);
        });
    }

    // --- Helpers ---

    /// Aplica `f` à entrada viva sob lock compartilhado. Se a chave expirou,
    /// solta o lock, remove pelo caminho exclusivo e retorna None.
    fn read_live<R>(&self, key: &[u8], now: i64, f: impl FnOnce(&Entry) -> R) -> Option<R> {
        let data = self.shared.data.read();
        let entry = data.get(key)?;
        if entry.is_expired_at(now) {
            drop(data);
            self.purge_key(key, now);
            return None;
        }
        Some(f(entry))
    }

    /// Outro leitor pode ter removido (ou alguém re-setado) a chave entre soltar
    /// o lock compartilhado e pegar o exclusivo.
    fn purge_key(&self, key: &[u8], now: i64) -> bool {
        let mut data = self.shared.data.write();
        remove_if_expired(&mut data, key, now)
    }
}

/// Único caminho de remoção por expiração (lazy e varredura ativa). Idempotente.
fn remove_if_expired(data: &mut DataMap, key: &[u8], now: i64) -> bool {
    if data.get(key).is_some_and(|entry| entry.is_expired_at(now)) {
        data.remove(key);
        debug!("key expirada removida: {}", String::from_utf8_lossy(key));
        return true;
    }
    false
}

fn live_mut<'a>(data: &'a mut DataMap, key: &[u8], now: i64) -> Option<&'a mut Entry> {
    remove_if_expired(data, key, now);
    data.get_mut(key)
}

fn slice_range(list: &VecDeque<Bytes>, start: i64, stop: i64) -> Vec<Bytes> {
    if list.is_empty() {
        return vec![];
    }

    let len = list.len() as i64;
    // Normalizar índices negativos (estilo Redis)
    let start = (if start < 0 { start + len } else { start }).clamp(0, len - 1);
    let stop = (if stop < 0 { stop + len } else { stop }).clamp(0, len - 1);

    if start > stop {
        return vec![];
    }

    list.range(start as usize..=stop as usize).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn get_set_basic() {
        let db = Db::new();
        db.set(b("key"), b("value"));
        assert_eq!(db.get(b"key"), Some(b("value")));
    }

    #[test]
    fn get_nonexistent() {
        let db = Db::new();
        assert_eq!(db.get(b"missing"), None);
    }

    #[test]
    fn set_overwrites_other_variant() {
        let db = Db::new();
        db.rpush(b("k"), b("a")).unwrap();
        db.expire(b"k", 100);
        db.set(b("k"), b("v"));
        assert_eq!(db.get(b"k"), Some(b("v")));
        assert_eq!(db.ttl(b"k"), -1);
        assert_eq!(db.llen(b"k"), 0);
    }

    #[test]
    fn del_keys() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        assert!(db.del(b"a"));
        assert!(!db.exists(b"a"));
        assert!(!db.del(b"a"));
        assert!(!db.del(b"never"));
    }

    #[test]
    fn del_reports_expired_key_as_removed() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        db.expire(b"a", -1);
        assert!(db.del(b"a"));
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn exists_keys() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        assert!(db.exists(b"a"));
        assert!(!db.exists(b"b"));
    }

    #[test]
    fn ttl_states() {
        let db = Db::new();
        assert_eq!(db.ttl(b"missing"), -2);

        db.set(b("k"), b("v"));
        assert_eq!(db.ttl(b"k"), -1);

        assert!(db.expire(b"k", 10));
        let ttl = db.ttl(b"k");
        assert!(ttl > 0 && ttl <= 10, "ttl = {ttl}");

        assert!(db.persist(b"k"));
        assert_eq!(db.ttl(b"k"), -1);
        assert!(!db.persist(b"k"));
    }

    #[test]
    fn expire_missing_key() {
        let db = Db::new();
        assert!(!db.expire(b"missing", 10));
    }

    #[test]
    fn expire_zero_is_immediate() {
        let db = Db::new();
        db.set(b("k"), b("v"));
        assert!(db.expire(b"k", 0));
        assert!(!db.exists(b"k"));
        assert_eq!(db.ttl(b"k"), -2);
        assert_eq!(db.get(b"k"), None);
    }

    #[test]
    fn expire_on_expired_key_fails() {
        let db = Db::new();
        db.set(b("k"), b("v"));
        db.expire(b"k", -5);
        assert!(!db.expire(b"k", 100));
        assert_eq!(db.len(), 0);
    }

    #[test]
    fn set_with_expiry_elapses() {
        let db = Db::new();
        db.set(b("key"), b("value"));
        db.expire(b"key", 1);
        assert_eq!(db.get(b"key"), Some(b("value")));

        std::thread::sleep(std::time::Duration::from_millis(1_100));
        assert_eq!(db.get(b"key"), None);
        assert_eq!(db.ttl(b"key"), -2);
    }

    #[test]
    fn lazy_cleanup_on_read() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        db.set(b("b"), b("2"));
        db.expire(b"a", 0);

        // Ainda fisicamente presente até alguém tocar a chave
        assert_eq!(db.len(), 2);
        assert!(!db.exists(b"a"));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn keys_filters_without_cleanup() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        db.set(b("b"), b("2"));
        db.expire(b"a", 0);

        let keys = db.keys();
        assert_eq!(keys, vec![b("b")]);
        assert_eq!(db.len(), 2);
    }

    #[test]
    fn purge_expired_sweeps_everything() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        db.rpush(b("l"), b("x")).unwrap();
        db.sadd(b("s"), b("m")).unwrap();
        db.set(b("keep"), b("v"));
        db.expire(b"a", 0);
        db.expire(b"l", -1);
        db.expire(b"s", 0);

        assert_eq!(db.purge_expired(), 3);
        assert_eq!(db.len(), 1);
        assert_eq!(db.purge_expired(), 0);
    }

    #[test]
    fn clear_removes_all() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        db.sadd(b("s"), b("m")).unwrap();
        db.clear();
        assert!(db.is_empty());
        assert!(db.keys().is_empty());
    }

    #[test]
    fn lpush_rpush() {
        let db = Db::new();
        assert_eq!(db.rpush(b("L"), b("x")).unwrap(), 1);
        assert_eq!(db.rpush(b("L"), b("y")).unwrap(), 2);
        assert_eq!(db.lpush(b("L"), b("z")).unwrap(), 3);
        assert_eq!(
            db.lrange(b"L", 0, -1).unwrap(),
            Some(vec![b("z"), b("x"), b("y")])
        );
    }

    #[test]
    fn lpop_rpop() {
        let db = Db::new();
        for v in ["a", "b", "c"] {
            db.rpush(b("list"), b(v)).unwrap();
        }

        assert_eq!(db.lpop(b"list").unwrap(), Some(b("a")));
        assert_eq!(db.rpop(b"list").unwrap(), Some(b("c")));
        assert_eq!(db.rpop(b"list").unwrap(), Some(b("b")));

        // Lista vazia continua como lista
        assert_eq!(db.lpop(b"list").unwrap(), None);
        assert!(db.exists(b"list"));
        assert_eq!(db.llen(b"list"), 0);
        assert_eq!(db.lrange(b"list", 0, -1).unwrap(), Some(vec![]));
        assert_eq!(db.lpop(b"missing").unwrap(), None);
    }

    #[test]
    fn lrange_negative_indices() {
        let db = Db::new();
        for v in ["a", "b", "c", "d"] {
            db.rpush(b("list"), b(v)).unwrap();
        }

        assert_eq!(
            db.lrange(b"list", -2, -1).unwrap(),
            Some(vec![b("c"), b("d")])
        );
        assert_eq!(
            db.lrange(b"list", 0, -2).unwrap(),
            Some(vec![b("a"), b("b"), b("c")])
        );
        assert_eq!(db.lrange(b"list", 2, 1).unwrap(), Some(vec![]));
    }

    #[test]
    fn lrange_clamps_out_of_bounds() {
        let db = Db::new();
        db.rpush(b("list"), b("a")).unwrap();
        db.rpush(b("list"), b("b")).unwrap();

        assert_eq!(
            db.lrange(b"list", 0, 100).unwrap(),
            Some(vec![b("a"), b("b")])
        );
        // start grampeado para len-1
        assert_eq!(db.lrange(b"list", 5, 10).unwrap(), Some(vec![b("b")]));
        // start negativo demais vira 0
        assert_eq!(db.lrange(b"list", -100, 0).unwrap(), Some(vec![b("a")]));
    }

    #[test]
    fn lrange_absent_vs_wrong_type_vs_empty() {
        let db = Db::new();
        db.set(b("str"), b("v"));
        db.rpush(b("list"), b("a")).unwrap();
        db.lpop(b"list").unwrap();

        assert_eq!(db.lrange(b"missing", 0, -1), Ok(None));
        assert_eq!(db.lrange(b"str", 0, -1), Err(StorageError::WrongType));
        assert_eq!(db.lrange(b"list", 0, -1), Ok(Some(vec![])));
    }

    #[test]
    fn llen_wrong_type_is_zero() {
        let db = Db::new();
        db.set(b("str"), b("v"));
        assert_eq!(db.llen(b"str"), 0);
        assert_eq!(db.llen(b"missing"), 0);
    }

    #[test]
    fn wrong_type_list_on_string() {
        let db = Db::new();
        db.set(b("a"), b("1"));
        assert_eq!(db.lpush(b("a"), b("x")), Err(StorageError::WrongType));
        assert_eq!(db.rpop(b"a"), Err(StorageError::WrongType));
        assert_eq!(db.get(b"a"), Some(b("1")));
    }

    #[test]
    fn wrong_type_string_on_list() {
        let db = Db::new();
        db.rpush(b("list"), b("a")).unwrap();
        // GET em lista retorna None (não erro, similar ao Redis)
        assert_eq!(db.get(b"list"), None);
        assert!(db.exists(b"list"));
    }

    #[test]
    fn wrong_type_between_list_and_set() {
        let db = Db::new();
        db.sadd(b("S"), b("m")).unwrap();
        db.rpush(b("L"), b("x")).unwrap();

        assert_eq!(db.rpush(b("S"), b("x")), Err(StorageError::WrongType));
        assert_eq!(db.lpop(b"S"), Err(StorageError::WrongType));
        assert_eq!(db.sadd(b("L"), b("m")), Err(StorageError::WrongType));
        assert_eq!(db.srem(b"L", b"x"), Err(StorageError::WrongType));
        assert_eq!(db.sismember(b"L", b"x"), Err(StorageError::WrongType));
        assert_eq!(db.smembers(b"L"), Err(StorageError::WrongType));
        assert_eq!(db.scard(b"L"), 0);

        // Nada mudou
        assert_eq!(db.smembers(b"S").unwrap(), Some(HashSet::from([b("m")])));
        assert_eq!(db.lrange(b"L", 0, -1).unwrap(), Some(vec![b("x")]));
    }

    #[test]
    fn push_on_expired_key_recreates() {
        let db = Db::new();
        db.set(b("k"), b("v"));
        db.expire(b"k", 0);
        assert_eq!(db.rpush(b("k"), b("x")).unwrap(), 1);
        assert_eq!(db.ttl(b"k"), -1);

        db.expire(b"k", 0);
        assert!(db.sadd(b("k"), b("m")).unwrap());
        assert_eq!(db.scard(b"k"), 1);
    }

    #[test]
    fn sadd_srem() {
        let db = Db::new();
        assert!(db.sadd(b("S"), b("m")).unwrap());
        assert!(!db.sadd(b("S"), b("m")).unwrap());
        assert_eq!(db.scard(b"S"), 1);

        assert!(db.sismember(b"S", b"m").unwrap());
        assert!(!db.sismember(b"S", b"other").unwrap());

        assert!(db.srem(b"S", b"m").unwrap());
        assert!(!db.srem(b"S", b"m").unwrap());
        assert_eq!(db.scard(b"S"), 0);
        assert_eq!(db.smembers(b"S").unwrap(), Some(HashSet::new()));
    }

    #[test]
    fn set_ops_on_missing_key() {
        let db = Db::new();
        assert_eq!(db.srem(b"S", b"m"), Ok(false));
        assert_eq!(db.sismember(b"S", b"m"), Ok(false));
        assert_eq!(db.smembers(b"S"), Ok(None));
        assert_eq!(db.scard(b"S"), 0);
    }

    #[test]
    fn smembers_returns_all() {
        let db = Db::new();
        for m in ["a", "b", "c", "a"] {
            db.sadd(b("S"), b(m)).unwrap();
        }
        let members = db.smembers(b"S").unwrap().unwrap();
        assert_eq!(members, HashSet::from([b("a"), b("b"), b("c")]));
    }

    #[test]
    fn replace_is_not_a_merge() {
        let db = Db::new();
        db.set(b("old"), b("1"));
        db.replace(vec![(
            b("new"),
            Entry::new(Value::String(b("2")), None),
        )]);
        assert_eq!(db.get(b"old"), None);
        assert_eq!(db.get(b"new"), Some(b("2")));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn concurrent_distinct_key_sets() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let db = Db::new();
        std::thread::scope(|s| {
            for t in 0..THREADS {
                let db = db.clone();
                s.spawn(move || {
                    for i in 0..PER_THREAD {
                        db.set(b(&format!("k:{t}:{i}")), b(&format!("v:{t}:{i}")));
                    }
                });
            }
        });

        assert_eq!(db.len(), THREADS * PER_THREAD);
        for t in 0..THREADS {
            for i in 0..PER_THREAD {
                let key = format!("k:{t}:{i}");
                assert_eq!(
                    db.get(key.as_bytes()),
                    Some(b(&format!("v:{t}:{i}")))
                );
            }
        }
    }

    #[test]
    fn concurrent_readers_race_on_expired_key() {
        let db = Db::new();
        db.set(b("k"), b("v"));
        db.expire(b"k", 0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                let db = db.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        assert_eq!(db.get(b"k"), None);
                        assert!(!db.exists(b"k"));
                    }
                });
            }
        });

        assert!(db.is_empty());
    }

    #[test]
    fn concurrent_pushes_keep_every_element() {
        let db = Db::new();
        std::thread::scope(|s| {
            for t in 0..4 {
                let db = db.clone();
                s.spawn(move || {
                    for i in 0..250 {
                        db.rpush(b("L"), b(&format!("{t}:{i}"))).unwrap();
                        db.sadd(b("S"), b(&format!("{t}:{i}"))).unwrap();
                    }
                });
            }
        });

        assert_eq!(db.llen(b"L"), 1_000);
        assert_eq!(db.scard(b"S"), 1_000);
    }
}
