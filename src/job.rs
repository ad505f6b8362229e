use std::{
    any::TypeId,
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};
use tokio_util::sync::CancellationToken;


/// Отложенный вызов без аргументов (очередь главного потока)
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Задание воркера. Токен отменяется при `cancel`/`cancel_all`
pub(crate) type Job = Box<dyn FnOnce(CancellationToken) + Send + 'static>;


/// Ключ группировки заданий для массовой отмены.
///
/// Не гарантирует уникальности: два вызова `submit` с одной и той же функцией
/// (или с замыканиями, созданными одним и тем же выражением) получают один ключ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Ключ, выведенный из типа вызываемого объекта
    pub fn of<F: 'static>() -> Self {
        Self(hash_one(TypeId::of::<F>()))
    }

    #[inline]
    pub fn of_val<F: 'static>(_f: &F) -> Self {
        Self::of::<F>()
    }

    pub fn tag(name: &str) -> Self {
        Self(hash_one(name))
    }

    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl From<u64> for JobId {
    fn from(raw: u64) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for JobId {
    fn from(name: &str) -> Self {
        Self::tag(name)
    }
}

fn hash_one<T: Hash>(value: T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
