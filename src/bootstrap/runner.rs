use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::notifier::{CheckEvent, ResultNotifier};
use super::steps::{BootstrapContext, DownloadClientCertificate, DownloadConfig};
use super::{CheckKind, Step};
use crate::fetch::Fetcher;
use crate::provider::{ProviderContext, ProviderLayout};

pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Invalid provider context: {0}")]
    InvalidProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Worker alive, waiting for checks.
    Idle,
    /// Worker executing a check.
    Running,
    /// No worker; `start` is required.
    Halted,
}

struct CheckQueue {
    /// Bumped whenever the queue is replaced.
    run: u64,
    checks: VecDeque<Box<dyn Step>>,
}

struct Shared {
    queue: Mutex<CheckQueue>,
    state: Mutex<RunnerState>,
    wake: Notify,
    should_quit: watch::Sender<bool>,
    /// Whether a worker owns the queue. Only flipped while holding this
    /// channel's lock, together with the `should_quit` check.
    worker_alive: watch::Sender<bool>,
    notifier: ResultNotifier,
    idle_interval: Duration,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, CheckQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: RunnerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> RunnerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the worker as gone if quitting was requested.
    fn retire_worker_if_quitting(&self, should_quit: &mut watch::Receiver<bool>) -> bool {
        self.worker_alive.send_if_modified(|alive| {
            if !*should_quit.borrow_and_update() {
                return false;
            }
            *alive = false;
            self.set_state(RunnerState::Halted);
            true
        })
    }
}

/// Releases the worker slot if the worker task ends without retiring, such as
/// when a check panics or the task is aborted.
struct WorkerGuard<'a> {
    shared: &'a Shared,
    retired: bool,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        if !self.retired {
            self.shared.worker_alive.send_modify(|alive| {
                *alive = false;
                self.shared.set_state(RunnerState::Halted);
            });
        }
    }
}

/// Runs queued bootstrap checks one at a time on a dedicated worker task.
///
/// Outcomes are delivered in execution order through the receiver returned by
/// [`CheckRunner::new`]. A failed check empties the queue; the worker stays
/// alive and picks up whatever is queued next.
pub struct CheckRunner {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    fetcher: Arc<dyn Fetcher>,
    layout: ProviderLayout,
}

impl CheckRunner {
    #[must_use]
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        layout: ProviderLayout,
        idle_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<CheckEvent>) {
        let (notifier, events) = ResultNotifier::channel();
        let (should_quit, _) = watch::channel(false);
        let (worker_alive, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            queue: Mutex::new(CheckQueue {
                run: 0,
                checks: VecDeque::new(),
            }),
            state: Mutex::new(RunnerState::Halted),
            wake: Notify::new(),
            should_quit,
            worker_alive,
            notifier,
            idle_interval,
        });
        let runner = Self {
            shared,
            worker: Mutex::new(None),
            fetcher,
            layout,
        };
        (runner, events)
    }

    /// Replaces the queue with the EIP setup sequence for `provider`.
    ///
    /// A check already in flight is not affected. Returns the run identifier
    /// carried by the resulting [`CheckEvent`]s.
    ///
    /// # Errors
    /// Returns [`RunnerError::InvalidProvider`] if the provider context is
    /// unusable; the queue is left untouched in that case.
    pub fn run_eip_setup_checks(
        &self,
        provider: ProviderContext,
        skip_if_present: bool,
    ) -> Result<u64, RunnerError> {
        provider.validate().map_err(RunnerError::InvalidProvider)?;
        info!(
            "Queueing EIP setup checks for {} (skip_if_present={skip_if_present})",
            provider.domain
        );
        let context = Arc::new(BootstrapContext::new(
            provider,
            self.layout.clone(),
            Arc::clone(&self.fetcher),
            skip_if_present,
        ));
        let checks: Vec<Box<dyn Step>> = vec![
            Box::new(DownloadConfig::new(Arc::clone(&context))),
            Box::new(DownloadClientCertificate::new(context)),
        ];
        Ok(self.enqueue_checks(checks))
    }

    /// Replaces the queue with `checks`, to run in the given order.
    pub fn enqueue_checks(&self, checks: Vec<Box<dyn Step>>) -> u64 {
        let run = {
            let mut queue = self.shared.queue();
            queue.run += 1;
            queue.checks = checks.into();
            queue.run
        };
        self.shared.wake.notify_one();
        run
    }

    /// Clears the cancellation flag and launches the worker if it is not running.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// A worker that was asked to quit but has not exited yet keeps running
    /// instead of being replaced.
    pub fn start(&self) {
        let shared = &self.shared;
        let spawn = shared.worker_alive.send_if_modified(|alive| {
            shared.should_quit.send_replace(false);
            if *alive {
                return false;
            }
            *alive = true;
            shared.set_state(RunnerState::Idle);
            true
        });
        if !spawn {
            debug!("Bootstrap worker already running");
            return;
        }
        let should_quit = shared.should_quit.subscribe();
        let handle = tokio::spawn(run_worker(Arc::clone(shared), should_quit));
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    /// Asks the worker to quit and waits until it has exited.
    ///
    /// A check in flight runs to completion first. Dropping the returned
    /// future early leaves the quit request in place.
    pub async fn stop(&self) {
        self.shared.should_quit.send_replace(true);
        let mut alive = self.shared.worker_alive.subscribe();
        if alive.wait_for(|alive| !*alive).await.is_err() {
            return;
        }
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            if worker.as_ref().is_some_and(JoinHandle::is_finished) {
                worker.take()
            } else {
                None
            }
        };
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            error!("Bootstrap worker join error: {err}");
        }
    }

    #[must_use]
    pub fn state(&self) -> RunnerState {
        self.shared.state()
    }

    #[must_use]
    pub fn pending_checks(&self) -> Vec<CheckKind> {
        self.shared
            .queue()
            .checks
            .iter()
            .map(|check| check.kind())
            .collect()
    }
}

impl Drop for CheckRunner {
    fn drop(&mut self) {
        self.shared.should_quit.send_replace(true);
    }
}

async fn run_worker(shared: Arc<Shared>, mut should_quit: watch::Receiver<bool>) {
    debug!("Bootstrap worker started");
    let mut guard = WorkerGuard {
        shared: &shared,
        retired: false,
    };
    loop {
        if shared.retire_worker_if_quitting(&mut should_quit) {
            guard.retired = true;
            debug!("Quitting bootstrap worker");
            break;
        }

        let next = {
            let mut queue = shared.queue();
            let run = queue.run;
            queue.checks.pop_front().map(|check| (run, check))
        };

        let Some((run, check)) = next else {
            tokio::select! {
                _ = should_quit.changed() => {}
                () = shared.wake.notified() => {}
                () = tokio::time::sleep(shared.idle_interval) => {}
            }
            continue;
        };

        shared.set_state(RunnerState::Running);
        let kind = check.kind();
        let outcome = check.execute().await;
        let passed = outcome.passed;
        shared.notifier.notify(CheckEvent { run, kind, outcome });

        if !passed {
            let mut queue = shared.queue();
            if queue.run == run {
                warn!(
                    "Check {kind} failed, dropping {} remaining check(s)",
                    queue.checks.len()
                );
                queue.checks.clear();
            }
        }
        shared.set_state(RunnerState::Idle);
    }
}
