use super::{
    context::PoolContext,
    errors::{PoolError, PoolResult},
    job::{Job, JobId},
    model::{PoolMetrics, WorkerState},
};
use std::{
    any::Any,
    collections::{BTreeSet, HashMap},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Instant,
};
use crossbeam::utils::CachePadded;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};


/// Конфигурация пула воркеров
#[derive(Debug, Clone)]
pub struct Config {
    pub num_workers: usize,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: num_cpus::get(),
            thread_name_prefix: "slotpool-worker".to_string(),
            stack_size: None,
        }
    }
}

impl Config {
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    pub fn cpu_bound() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn io_bound() -> Self {
        Self::new(num_cpus::get() * 2)
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}


#[derive(Debug, Clone)]
enum WorkerExit {
    Terminated,
    Failed(String),
}

struct SlotState {
    job: Option<Job>,
    job_id: Option<JobId>,
    running: bool,
    // флаг остановки текущего назначения; новый токен на каждый submit
    stop: CancellationToken,
    shutdown: bool,
    exit: Option<WorkerExit>,
}

impl SlotState {
    #[inline]
    fn is_idle(&self) -> bool {
        self.job.is_none() && !self.running && !self.shutdown && self.exit.is_none()
    }

    fn state(&self) -> WorkerState {
        match &self.exit {
            Some(WorkerExit::Terminated) => WorkerState::Terminated,
            Some(WorkerExit::Failed(msg)) => WorkerState::Failed(msg.clone()),
            None if self.running => WorkerState::Running,
            None if self.job.is_some() => WorkerState::Queued,
            None => WorkerState::Idle,
        }
    }
}

struct WorkerSlot {
    state: Mutex<SlotState>,
    work_ready: Condvar,
    became_idle: Condvar,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                job: None,
                job_id: None,
                running: false,
                stop: CancellationToken::new(),
                shutdown: false,
                exit: None,
            }),
            work_ready: Condvar::new(),
            became_idle: Condvar::new(),
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while<'a>(
        &self,
        guard: MutexGuard<'a, SlotState>,
        cond: impl FnMut(&mut SlotState) -> bool,
    ) -> MutexGuard<'a, SlotState> {
        self.became_idle
            .wait_while(guard, cond)
            .unwrap_or_else(PoisonError::into_inner)
    }
}


type JobIndex = HashMap<JobId, BTreeSet<usize>>;

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    dropped: AtomicUsize,
    cancelled: AtomicUsize,
    failed: AtomicUsize,
}

/// Состояние, разделяемое пулом и его потоками.
///
/// Порядок блокировок: сначала `index`, затем блокировка слота.
/// Ни один путь не берет `index`, удерживая блокировку слота.
struct Shared {
    slots: Box<[CachePadded<WorkerSlot>]>,
    index: Mutex<JobIndex>,
    counters: Counters,
}

impl Shared {
    #[inline]
    fn lock_index(&self) -> MutexGuard<'_, JobIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Поднимает флаг остановки; задание, которое еще не начало выполняться, выбрасывается.
    /// Возвращает ключ выброшенного задания: вызывающий обязан убрать воркер из индекса.
    fn raise_stop(&self, slot: &WorkerSlot, state: &mut SlotState) -> Option<JobId> {
        if state.job_id.is_some() && !state.stop.is_cancelled() {
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        }
        state.stop.cancel();

        if !state.running && state.job.take().is_some() {
            slot.became_idle.notify_all();
            return state.job_id.take();
        }
        None
    }

    fn metrics(&self) -> PoolMetrics {
        let (mut running, mut queued, mut idle) = (0, 0, 0);
        for slot in self.slots.iter() {
            match slot.lock().state() {
                WorkerState::Running => running += 1,
                WorkerState::Queued => queued += 1,
                WorkerState::Idle => idle += 1,
                WorkerState::Terminated | WorkerState::Failed(_) => {}
            }
        }

        PoolMetrics {
            workers: self.slots.len(),
            running,
            queued,
            idle,
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

fn unregister(jobs: &mut JobIndex, id: JobId, worker: usize) {
    if let Some(workers) = jobs.get_mut(&id) {
        workers.remove(&worker);
        if workers.is_empty() {
            jobs.remove(&id);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    let slot = &shared.slots[index];

    loop {
        let (job, token) = {
            let mut state = slot.lock();
            state = slot
                .work_ready
                .wait_while(state, |s| s.job.is_none() && !s.shutdown)
                .unwrap_or_else(PoisonError::into_inner);

            if state.shutdown {
                state.exit = Some(WorkerExit::Terminated);
                break;
            }
            let Some(job) = state.job.take() else { continue };
            state.running = true;
            (job, state.stop.clone())
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(move || job(token)));

        let mut jobs = shared.lock_index();
        let mut state = slot.lock();
        state.running = false;
        if let Some(id) = state.job_id.take() {
            unregister(&mut jobs, id, index);
        }
        drop(jobs);

        let failed = match outcome {
            Ok(()) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!(worker = index, panic = %msg, "job panicked, worker is out of service");
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                state.exit = Some(WorkerExit::Failed(msg));
                true
            }
        };
        drop(state);
        slot.became_idle.notify_all();

        if failed {
            return;
        }
    }

    debug!(worker = index, "worker terminated");
}


/// Пул из фиксированного числа потоков, по одному заданию на поток.
///
/// Очереди нет: `submit` отдает задание самому младшему свободному воркеру,
/// а если свободных нет, задание отбрасывается с предупреждением в лог.
/// Отмена кооперативная: выполняющееся задание никогда не прерывается.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    config: Config,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> PoolResult<Self> {
        Self::with_config(Config::new(num_workers))
    }

    pub fn with_config(config: Config) -> PoolResult<Self> {
        Self::with_context(PoolContext::global(), config)
    }

    /// Создает пул в заданном контексте. Первый созданный пул закрепляет
    /// главный поток контекста; создание из любого другого потока завершится
    /// ошибкой [`PoolError::NotMainThread`].
    pub fn with_context(ctx: &PoolContext, config: Config) -> PoolResult<Self> {
        ctx.pin_main_thread()?;
        if config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        let num_workers = config.num_workers;
        let slots = (0..num_workers)
            .map(|_| CachePadded::new(WorkerSlot::new()))
            .collect();

        // при ошибке spawn Drop остановит уже запущенные потоки
        let mut pool = WorkerPool {
            shared: Arc::new(Shared {
                slots,
                index: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
            handles: Vec::with_capacity(num_workers),
            config,
        };

        for index in 0..num_workers {
            let mut builder = thread::Builder::new()
                .name(format!("{}-{}", pool.config.thread_name_prefix, index));
            if let Some(size) = pool.config.stack_size {
                builder = builder.stack_size(size);
            }

            let shared = Arc::clone(&pool.shared);
            let handle = builder.spawn(move || worker_loop(shared, index))?;
            pool.handles.push(handle);
        }

        debug!(workers = num_workers, "worker pool started");
        Ok(pool)
    }

    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.slots.len()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Отдает задание свободному воркеру; ключ группировки выводится из типа `f`.
    /// Возвращает индекс воркера или `None`, если задание отброшено.
    pub fn submit<F>(&self, f: F) -> Option<usize>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = JobId::of_val(&f);
        self.install(id, Box::new(move |_| f()))
    }

    pub fn submit_tagged<F>(&self, id: impl Into<JobId>, f: F) -> Option<usize>
    where
        F: FnOnce() + Send + 'static,
    {
        self.install(id.into(), Box::new(move |_| f()))
    }

    /// Как `submit_tagged`, но задание получает токен своего назначения
    /// и может само проверять запрос на остановку.
    pub fn submit_cancellable<F>(&self, id: impl Into<JobId>, f: F) -> Option<usize>
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        self.install(id.into(), Box::new(f))
    }

    fn install(&self, id: JobId, job: Job) -> Option<usize> {
        let mut jobs = self.shared.lock_index();

        for (index, slot) in self.shared.slots.iter().enumerate() {
            let mut state = slot.lock();
            if !state.is_idle() {
                continue;
            }

            state.job = Some(job);
            state.job_id = Some(id);
            state.stop = CancellationToken::new();
            drop(state);
            slot.work_ready.notify_one();

            jobs.entry(id).or_default().insert(index);
            self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
            debug!(worker = index, job = id.raw(), "job assigned");
            return Some(index);
        }

        drop(jobs);
        self.shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            workers = self.num_workers(),
            job = id.raw(),
            "no idle worker available, job dropped"
        );
        None
    }

    /// Останавливает все воркеры и ждет, пока ни одно задание не выполняется.
    /// Выполняющиеся задания дорабатывают до конца; ожидание без таймаута.
    pub fn cancel_all(&self) {
        self.stop_all();

        for slot in self.shared.slots.iter() {
            let state = slot.lock();
            drop(slot.wait_while(state, |s| s.running));
        }

        self.shared.lock_index().clear();
    }

    // выброшенные задания уходят из индекса под тем же замком
    fn stop_all(&self) {
        let mut jobs = self.shared.lock_index();
        for (index, slot) in self.shared.slots.iter().enumerate() {
            let mut state = slot.lock();
            if let Some(id) = self.shared.raise_stop(slot, &mut state) {
                unregister(&mut jobs, id, index);
            }
        }
    }

    /// Останавливает только воркеры, занятые заданиями с ключом `id`
    pub fn cancel(&self, id: impl Into<JobId>) {
        let id = id.into();
        let workers = self.shared.lock_index().remove(&id).unwrap_or_default();

        // сначала останавливаем всех, потом ждем: иначе поздние воркеры
        // узнают об остановке только после завершения ранних
        // множество `id` уже вынуто из индекса, выброшенные задания чистить не нужно
        let mut stopped = Vec::with_capacity(workers.len());
        for index in workers {
            let slot = &self.shared.slots[index];
            let mut state = slot.lock();
            // воркер мог успеть освободиться и взять чужое задание
            if state.job_id != Some(id) {
                continue;
            }
            self.shared.raise_stop(slot, &mut state);
            stopped.push(index);
        }

        for index in stopped {
            let slot = &self.shared.slots[index];
            let state = slot.lock();
            drop(slot.wait_while(state, |s| s.running && s.job_id == Some(id)));
        }
        debug!(job = id.raw(), "job cancelled");
    }

    /// Снимок: выполняет ли хоть один воркер задание прямо сейчас
    pub fn is_busy(&self) -> bool {
        self.shared.slots.iter().any(|slot| slot.lock().running)
    }

    pub fn running_workers(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|slot| slot.lock().running)
            .count()
    }

    /// Блокирует поток, пока у воркеров не останется ни выполняющихся, ни ожидающих заданий
    pub fn wait_idle(&self) {
        for slot in self.shared.slots.iter() {
            let state = slot.lock();
            drop(slot.wait_while(state, |s| s.running || s.job.is_some()));
        }
    }

    /// Как `wait_idle`, но не дольше `timeout`. Возвращает `true`, если пул освободился
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for slot in self.shared.slots.iter() {
            let mut state = slot.lock();
            while state.running || state.job.is_some() {
                let Some(left) = deadline.checked_duration_since(Instant::now()) else {
                    return false;
                };
                state = slot
                    .became_idle
                    .wait_timeout(state, left)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
        true
    }

    pub fn worker_state(&self, index: usize) -> Option<WorkerState> {
        self.shared.slots.get(index).map(|slot| slot.lock().state())
    }

    pub fn failed_workers(&self) -> Vec<usize> {
        self.shared
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| matches!(slot.lock().exit, Some(WorkerExit::Failed(_))))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn is_assigned(&self, id: impl Into<JobId>) -> bool {
        self.shared.lock_index().contains_key(&id.into())
    }

    pub fn assigned_workers(&self, id: impl Into<JobId>) -> Vec<usize> {
        self.shared
            .lock_index()
            .get(&id.into())
            .map(|workers| workers.iter().copied().collect())
            .unwrap_or_default()
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        self.shared.metrics()
    }

    /// Периодически передает метрики в callback из задачи tokio.
    /// Требует запущенного рантайма; для остановки вызовите `token.cancel()`.
    pub fn start_monitoring<F>(&self, interval: Duration, callback: F) -> CancellationToken
    where
        F: Fn(PoolMetrics) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let token = CancellationToken::new();
        let token_clone = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        callback(shared.metrics());
                    }
                    _ = token_clone.cancelled() => {
                        drop(shared);
                        break;
                    }
                }
            }
        });

        token
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.cancel_all();

        for slot in self.shared.slots.iter() {
            slot.lock().shutdown = true;
            slot.work_ready.notify_one();
        }

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread exited abnormally");
            }
        }
        debug!(workers = self.num_workers(), "worker pool shut down");
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    fn pool(ctx: &PoolContext, n: usize) -> WorkerPool {
        WorkerPool::with_context(ctx, Config::new(n)).unwrap()
    }

    #[test]
    fn lowest_index_idle_worker_is_chosen() {
        let ctx = PoolContext::new();
        let pool = pool(&ctx, 3);
        let (release_tx, release_rx) = channel::unbounded::<()>();

        let rx = release_rx.clone();
        assert_eq!(pool.submit(move || { let _ = rx.recv(); }), Some(0));
        let rx = release_rx.clone();
        assert_eq!(pool.submit(move || { let _ = rx.recv(); }), Some(1));

        drop(release_tx);
        pool.wait_idle();
        assert_eq!(pool.submit(|| {}), Some(0));
        pool.wait_idle();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let ctx = PoolContext::new();
        assert!(matches!(
            WorkerPool::with_context(&ctx, Config::new(0)),
            Err(PoolError::NoWorkers)
        ));
    }

    #[test]
    fn states_follow_assignment() {
        let ctx = PoolContext::new();
        let pool = pool(&ctx, 2);
        let (started_tx, started_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded::<()>(0);

        assert_eq!(pool.worker_state(0), Some(WorkerState::Idle));
        assert_eq!(pool.worker_state(2), None);

        pool.submit(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        });
        started_rx.recv().unwrap();
        assert_eq!(pool.worker_state(0), Some(WorkerState::Running));
        assert_eq!(pool.worker_state(1), Some(WorkerState::Idle));

        release_tx.send(()).unwrap();
        pool.wait_idle();
        assert_eq!(pool.worker_state(0), Some(WorkerState::Idle));
    }

    // пул без потоков: установленные задания навсегда остаются в очереди слота
    fn detached(n: usize) -> WorkerPool {
        WorkerPool {
            shared: Arc::new(Shared {
                slots: (0..n).map(|_| CachePadded::new(WorkerSlot::new())).collect(),
                index: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
            handles: Vec::new(),
            config: Config::new(n),
        }
    }

    #[test]
    fn cancel_discards_queued_job_and_index_entry() {
        let pool = detached(2);
        assert_eq!(pool.submit_tagged("a", || {}), Some(0));
        assert_eq!(pool.submit_tagged("b", || {}), Some(1));
        assert_eq!(pool.worker_state(0), Some(WorkerState::Queued));

        pool.cancel("a");

        assert_eq!(pool.worker_state(0), Some(WorkerState::Idle));
        assert!(!pool.is_assigned("a"));
        assert_eq!(pool.assigned_workers("b"), vec![1]);

        assert_eq!(pool.submit_tagged("c", || {}), Some(0));
        assert_eq!(pool.assigned_workers("c"), vec![0]);
        assert_eq!(pool.metrics().cancelled, 1);
    }

    #[test]
    fn cancel_all_unregisters_discarded_jobs_before_waiting() {
        let pool = detached(2);
        pool.submit_tagged("a", || {});
        pool.submit_tagged("a", || {});
        assert_eq!(pool.assigned_workers("a"), vec![0, 1]);

        // фаза остановки сама чистит индекс, до ожидания и финальной очистки
        pool.stop_all();
        assert!(!pool.is_assigned("a"));
        assert!(pool.shared.lock_index().is_empty());

        pool.cancel_all();
        assert_eq!(pool.worker_state(0), Some(WorkerState::Idle));
        assert_eq!(pool.worker_state(1), Some(WorkerState::Idle));
        assert_eq!(pool.metrics().cancelled, 2);
    }

    #[test]
    fn wait_idle_timeout_expires_on_stuck_job() {
        let pool = detached(1);
        assert!(pool.wait_idle_timeout(Duration::from_millis(5)));

        pool.submit(|| {});
        assert!(!pool.wait_idle_timeout(Duration::from_millis(20)));

        pool.cancel_all();
        assert!(pool.wait_idle_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn panic_message_is_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
