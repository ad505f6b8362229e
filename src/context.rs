use super::{
    dispatcher::MainThreadDispatcher,
    errors::{PoolError, PoolResult},
};
use std::{
    sync::OnceLock,
    thread::{self, ThreadId},
};


static GLOBAL: OnceLock<PoolContext> = OnceLock::new();

/// Долгоживущий контекст: закрепленный главный поток и его очередь вызовов.
///
/// Главный поток закрепляется первым созданным пулом (или первым `drain`),
/// после чего остается неизменным на все время жизни контекста.
#[derive(Default)]
pub struct PoolContext {
    main_thread: OnceLock<ThreadId>,
    dispatcher: MainThreadDispatcher,
}

impl PoolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Контекст процесса, создается при первом обращении и никогда не уничтожается
    pub fn global() -> &'static PoolContext {
        GLOBAL.get_or_init(PoolContext::new)
    }

    #[inline]
    pub fn dispatcher(&self) -> &MainThreadDispatcher {
        &self.dispatcher
    }

    pub fn main_thread_id(&self) -> Option<ThreadId> {
        self.main_thread.get().copied()
    }

    pub fn is_main_thread(&self) -> bool {
        self.main_thread_id() == Some(thread::current().id())
    }

    /// Закрепляет текущий поток как главный, если еще ничего не закреплено
    pub fn pin_main_thread(&self) -> PoolResult<ThreadId> {
        let current = thread::current().id();
        let main = *self.main_thread.get_or_init(|| current);
        if main != current {
            return Err(PoolError::NotMainThread { main, current });
        }
        Ok(main)
    }

    pub fn execute_on_main_thread<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.dispatcher.enqueue(f);
    }

    pub fn process_main_thread_queue(&self) -> PoolResult<usize> {
        self.pin_main_thread()?;
        Ok(self.dispatcher.drain())
    }
}
