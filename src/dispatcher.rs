use super::job::Task;
use std::{
    collections::VecDeque,
    mem,
    sync::{Arc, Mutex, PoisonError},
};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;


/// FIFO-очередь отложенных вызовов для главного потока.
///
/// Клонирование дешевое: все клоны разделяют одну очередь.
/// `drain` вызывается владельцем главного потока, сам диспетчер никого не опрашивает.
#[derive(Clone, Default)]
pub struct MainThreadDispatcher {
    queue: Arc<Mutex<VecDeque<Task>>>,
}

impl MainThreadDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn enqueue<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock().push_back(Box::new(f));
    }

    /// Забирает текущую очередь под блокировкой и выполняет ее по порядку вне блокировки.
    /// Вызовы, добавленные во время выполнения, попадут в следующий `drain`.
    pub fn drain(&self) -> usize {
        let batch = mem::take(&mut *self.lock());
        let len = batch.len();
        for task in batch {
            task();
        }
        len
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Периодически выполняет `drain`, пока не отменен токен.
    /// Запускать на current-thread рантайме в главном потоке.
    pub async fn run_until_cancelled(&self, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.drain();
                }
                _ = token.cancelled() => {
                    self.drain();
                    break;
                }
            }
        }
    }

    // Паника внутри вызова происходит вне блокировки, поэтому отравление не портит очередь
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
