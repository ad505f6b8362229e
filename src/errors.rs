use std::thread::ThreadId;

/// Ошибки создания пула и работы с очередью главного потока
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Пул создан не в том потоке, который был закреплен как главный
    #[error("worker pool must be constructed on the main thread (main: {main:?}, current: {current:?})")]
    NotMainThread {
        main: ThreadId,
        current: ThreadId,
    },
    #[error("worker pool needs at least one worker")]
    NoWorkers,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type PoolResult<T> = Result<T, PoolError>;
