#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub workers: usize,
    pub running: usize,
    pub queued: usize,
    pub idle: usize,
    pub submitted: usize,
    pub completed: usize,
    pub dropped: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        if self.workers == 0 {
            return 0.0;
        }
        (self.running + self.queued) as f64 / self.workers as f64
    }

    /// Доля заданий, отброшенных из-за отсутствия свободных воркеров
    pub fn drop_rate(&self) -> f64 {
        let total = self.submitted + self.dropped;
        if total == 0 {
            return 0.0;
        }
        self.dropped as f64 / total as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            return 1.0;
        }
        self.completed as f64 / total as f64
    }
}


/// Состояние отдельного воркера
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    /// Задание установлено, но поток еще не начал его выполнять
    Queued,
    Running,
    /// Поток завершен при уничтожении пула
    Terminated,
    /// Задание запаниковало; поток завершен и больше не принимает работу
    Failed(String),
}

impl WorkerState {
    pub fn is_alive(&self) -> bool {
        !matches!(self, WorkerState::Terminated | WorkerState::Failed(_))
    }
}
