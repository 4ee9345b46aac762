//! Worker thread pool: one reactor per thread, share-nothing.
//!
//! The pool owns thread lifecycle only — naming, optional CPU pinning,
//! stop coordination and join. Everything a worker touches after spawn is
//! thread-local; the shared state is limited to the stop flag, the force-
//! close deadline, and each reactor's wake handle.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::reactor::RemoteHandle;

/// Worker entry point: receives its index and the shared pool state, builds
/// its reactor and runs until stopped.
pub type WorkerMain = Box<dyn FnOnce(usize, Arc<PoolShared>) + Send + 'static>;

/// State shared between the pool handle and its workers.
pub struct PoolShared {
    stop: AtomicBool,
    force_deadline: Mutex<Option<Instant>>,
    remotes: Mutex<Vec<Option<RemoteHandle>>>,
}

impl PoolShared {
    fn new(worker_count: usize) -> Self {
        Self {
            stop: AtomicBool::new(false),
            force_deadline: Mutex::new(None),
            remotes: Mutex::new(vec![None; worker_count]),
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Instant past which workers force-close remaining connections.
    pub fn force_deadline(&self) -> Option<Instant> {
        *self.force_deadline.lock().expect("deadline lock")
    }

    /// Publishes a worker's wake handle; called once per worker at startup.
    pub fn register_remote(&self, index: usize, remote: RemoteHandle) {
        self.remotes.lock().expect("remotes lock")[index] = Some(remote);
    }

    /// Wake handle of a sibling worker, once it has started.
    pub fn remote(&self, index: usize) -> Option<RemoteHandle> {
        self.remotes.lock().expect("remotes lock").get(index).cloned().flatten()
    }

    fn stop_all(&self) {
        for remote in self.remotes.lock().expect("remotes lock").iter().flatten() {
            remote.stop();
        }
    }
}

/// Handle over the spawned worker threads.
pub struct ReactorPool {
    threads: Vec<JoinHandle<()>>,
    shared: Arc<PoolShared>,
    grace: Duration,
}

impl ReactorPool {
    /// Spawns one thread per entry in `workers`. With `pin_workers` each
    /// thread is pinned to a core round-robin; pinning is a latency
    /// optimization, isolation comes from the share-nothing state.
    pub fn spawn(workers: Vec<WorkerMain>, pin_workers: bool, grace: Duration) -> io::Result<Self> {
        let shared = Arc::new(PoolShared::new(workers.len()));
        let core_ids = if pin_workers { core_affinity::get_core_ids().unwrap_or_default() } else { Vec::new() };

        let mut threads = Vec::with_capacity(workers.len());
        for (index, main) in workers.into_iter().enumerate() {
            let shared = Arc::clone(&shared);
            let core = if core_ids.is_empty() { None } else { Some(core_ids[index % core_ids.len()]) };

            let thread = std::thread::Builder::new()
                .name(format!("peregrine-worker-{index}"))
                .spawn(move || {
                    if let Some(core) = core {
                        if !core_affinity::set_for_current(core) {
                            warn!(worker = index, "failed to pin worker thread");
                        }
                    }
                    main(index, shared);
                    info!(worker = index, "worker stopped");
                })?;
            threads.push(thread);
        }

        Ok(Self { threads, shared, grace })
    }

    pub fn shared(&self) -> Arc<PoolShared> {
        Arc::clone(&self.shared)
    }

    /// Signals every worker to stop accepting, drain in-flight work until
    /// the grace deadline, then force-close what remains.
    pub fn graceful_stop(&self) {
        *self.shared.force_deadline.lock().expect("deadline lock") = Some(Instant::now() + self.grace);
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.stop_all();
        info!(grace_ms = self.grace.as_millis() as u64, "graceful stop requested");
    }

    /// Joins every worker thread.
    pub fn wait(self) {
        for thread in self.threads {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}
