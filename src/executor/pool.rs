use crate::config::PoolConfig;
use crate::executor::{Executor, Task};
use crate::utils::{CancelToken, StatusFlag, panic_message};
use crossbeam::channel as cbchan;
use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_THREAD_NAME: &str = "flowrt-worker";

/// Multi-threaded executor: N workers draining a shared injector channel.
///
/// Workers use a spin/snooze ladder while hot and fall back to a timed
/// receive once idle. A panicking task is contained and logged; the
/// worker keeps running.
pub struct ThreadPool {
    injector: cbchan::Sender<Task>,
    cancel: CancelToken,
    alive: StatusFlag,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn worker threads per `cfg` and return the shared pool handle.
    pub fn spawn(cfg: PoolConfig) -> anyhow::Result<Arc<Self>> {
        let workers = cfg.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let name = cfg
            .thread_name
            .unwrap_or_else(|| DEFAULT_THREAD_NAME.to_string());

        let (injector, feed) = cbchan::unbounded::<Task>();
        let cancel = CancelToken::new_root();
        let mut joins = Vec::with_capacity(workers);

        for idx in 0..workers {
            let feed = feed.clone();
            let cancel = cancel.new_child();
            let join = std::thread::Builder::new()
                .name(format!("{name}-{idx}"))
                .spawn(move || worker_loop(idx, feed, cancel))?;
            joins.push(join);
        }
        tracing::debug!(workers, "thread pool started");

        let pool = Arc::new(Self {
            injector,
            cancel,
            alive: StatusFlag::new(true),
            workers: Mutex::new(joins),
        });
        Ok(pool)
    }

    /// Whether the pool still accepts work.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.get()
    }

    /// Stop accepting work, wake the workers and join them.
    /// Tasks already queued are dropped, not run.
    pub fn shutdown(&self) {
        self.alive.down();
        self.cancel.cancel();
        let joins: Vec<_> = self.workers.lock().drain(..).collect();
        for join in joins {
            let _ = join.join();
        }
        tracing::debug!("thread pool stopped");
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) {
        if !self.alive.get() {
            tracing::warn!("task submitted to a stopped pool, dropped");
            return;
        }
        if self.injector.send(task).is_err() {
            tracing::error!("pool injector disconnected, task dropped");
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.alive.down();
        self.cancel.cancel();
    }
}

fn worker_loop(idx: usize, feed: cbchan::Receiver<Task>, cancel: CancelToken) {
    let backoff = Backoff::new();
    let mut spins: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        match feed.try_recv() {
            Ok(task) => {
                spins = 0;
                backoff.reset();
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                    tracing::error!(worker = idx, "task panicked: {}", panic_message(payload));
                }
            }
            Err(cbchan::TryRecvError::Empty) => {
                spins = spins.saturating_add(1);
                if spins < 64 {
                    backoff.spin();
                } else if spins < 256 {
                    backoff.snooze();
                } else {
                    // idle: park on the channel so a quiet pool burns no CPU
                    match feed.recv_timeout(Duration::from_millis(20)) {
                        Ok(task) => {
                            spins = 0;
                            backoff.reset();
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                                tracing::error!(
                                    worker = idx,
                                    "task panicked: {}",
                                    panic_message(payload)
                                );
                            }
                        }
                        Err(cbchan::RecvTimeoutError::Timeout) => {}
                        Err(cbchan::RecvTimeoutError::Disconnected) => break,
                    }
                }
            }
            Err(cbchan::TryRecvError::Disconnected) => break,
        }
    }
    tracing::trace!(worker = idx, "worker exited");
}
