use crate::config::types::BalanceStrategy;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Instant;

/// Per-worker counters
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub processed: u64,
    pub failed: u64,
    /// Jobs assigned and not yet finished (inbox + in progress)
    pub current_load: usize,
    pub last_active: Instant,
    pub healthy: bool,
}

impl WorkerStats {
    fn new() -> Self {
        Self {
            processed: 0,
            failed: 0,
            current_load: 0,
            last_active: Instant::now(),
            healthy: true,
        }
    }
}

/// Picks a worker for each job and tracks per-worker load.
pub struct LoadBalancer {
    strategy: BalanceStrategy,
    stats: RwLock<HashMap<usize, WorkerStats>>,
    next: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: BalanceStrategy) -> Self {
        Self {
            strategy,
            stats: RwLock::new(HashMap::new()),
            next: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> BalanceStrategy {
        self.strategy
    }

    pub fn register(&self, worker_id: usize) {
        self.write().insert(worker_id, WorkerStats::new());
    }

    pub fn remove(&self, worker_id: usize) -> Option<WorkerStats> {
        self.write().remove(&worker_id)
    }

    /// Choose among `candidates` (workers able to take a job). None when empty.
    pub fn select(&self, candidates: &[usize]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let picked = match self.strategy {
            BalanceStrategy::RoundRobin => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                candidates[n % candidates.len()]
            }
            BalanceStrategy::LeastLoaded => {
                let stats = self.read();
                *candidates
                    .iter()
                    .min_by_key(|id| stats.get(id).map(|s| s.current_load).unwrap_or(0))?
            }
            BalanceStrategy::Random => {
                candidates[rand::thread_rng().gen_range(0..candidates.len())]
            }
        };
        Some(picked)
    }

    pub fn assigned(&self, worker_id: usize) {
        if let Some(s) = self.write().get_mut(&worker_id) {
            s.current_load += 1;
        }
    }

    /// Undo an `assigned` whose job never reached the worker
    pub fn unassigned(&self, worker_id: usize) {
        if let Some(s) = self.write().get_mut(&worker_id) {
            s.current_load = s.current_load.saturating_sub(1);
        }
    }

    pub fn finished(&self, worker_id: usize, ok: bool) {
        if let Some(s) = self.write().get_mut(&worker_id) {
            s.current_load = s.current_load.saturating_sub(1);
            s.last_active = Instant::now();
            s.healthy = ok;
            if ok {
                s.processed += 1;
            } else {
                s.failed += 1;
            }
        }
    }

    /// Worker with the lowest current load among `ids`
    pub fn least_loaded(&self, ids: &[usize]) -> Option<usize> {
        let stats = self.read();
        ids.iter()
            .copied()
            .min_by_key(|id| stats.get(id).map(|s| s.current_load).unwrap_or(0))
    }

    pub fn load(&self, worker_id: usize) -> usize {
        self.read().get(&worker_id).map(|s| s.current_load).unwrap_or(0)
    }

    pub fn total_load(&self) -> usize {
        self.read().values().map(|s| s.current_load).sum()
    }

    pub fn snapshot(&self) -> HashMap<usize, WorkerStats> {
        self.read().clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<usize, WorkerStats>> {
        self.stats.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<usize, WorkerStats>> {
        self.stats.write().unwrap_or_else(|e| e.into_inner())
    }
}
