//! Пул потоков фиксированного размера с привязкой заданий к воркерам
//! и очередью отложенных вызовов для главного потока
//!
//! # Features
//! - Одно задание на воркер, без очереди: при насыщении задание отбрасывается
//! - Отмена всех воркеров или только занятых заданиями с заданным ключом
//! - Кооперативная отмена через `CancellationToken`
//! - Явное состояние воркера, упавшего из-за паники в задании
//! - Очередь вызовов для главного потока (`MainThreadDispatcher`)
//! - Метрики и мониторинг

pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod job;
pub mod model;
pub mod pool;

pub use context::PoolContext;
pub use dispatcher::MainThreadDispatcher;
pub use errors::{PoolError, PoolResult};
pub use job::JobId;
pub use model::{PoolMetrics, WorkerState};
pub use pool::{Config, WorkerPool};
