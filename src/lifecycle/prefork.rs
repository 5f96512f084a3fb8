//! Multi-process serving: one master, N workers sharing a listening socket.
//!
//! # Protocol
//! ```text
//! master: bind → clear close-on-exec → spawn N × (current exe, same args,
//!         SWITCHYARD_PREFORK_CHILD=1, SWITCHYARD_LISTENER_FD=<fd>)
//!         → restart crashed workers (bounded) → on shutdown SIGTERM all,
//!         wait up to the shutdown timeout, then kill stragglers
//! worker: take the inherited fd → serve → exit on SIGTERM or when the
//!         master disappears
//! ```
//!
//! # Constraints
//! - Every worker is a separate process; in-memory state (caches,
//!   counters, sessions) is per worker and never shared
//! - Where descriptors cannot be inherited, workers bind their own
//!   `SO_REUSEPORT` socket and no fd is passed

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Command;
use tokio::task::JoinSet;

use crate::config::ProcessConfig;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Set in the environment of every worker process.
pub const CHILD_ENV: &str = "SWITCHYARD_PREFORK_CHILD";
/// Descriptor number of the inherited listening socket.
pub const LISTENER_FD_ENV: &str = "SWITCHYARD_LISTENER_FD";
/// Worker slot number, for logs.
pub const WORKER_ID_ENV: &str = "SWITCHYARD_WORKER_ID";

const RESTART_BASE_MS: u64 = 100;
const RESTART_MAX_MS: u64 = 5_000;
/// Extra time workers get on top of their own drain timeout.
const STOP_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum PreforkError {
    #[error("failed to locate current executable: {0}")]
    CurrentExe(std::io::Error),

    #[error("failed to spawn worker {id}: {source}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("workers crashed {crashes} times, above the recover threshold of {threshold}")]
    TooManyCrashes { crashes: usize, threshold: usize },
}

/// True when this process was started by a prefork master.
pub fn is_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Inherited listener descriptor, if the master passed one.
pub fn inherited_fd() -> Option<i32> {
    std::env::var(LISTENER_FD_ENV).ok()?.parse().ok()
}

pub fn worker_id() -> Option<usize> {
    std::env::var(WORKER_ID_ENV).ok()?.parse().ok()
}

type WorkerExit = (usize, Option<u32>, std::io::Result<ExitStatus>);

/// Spawns and supervises the worker processes of a prefork master.
pub struct WorkerPool {
    program: PathBuf,
    args: Vec<OsString>,
    listener_fd: Option<i32>,
    running: JoinSet<WorkerExit>,
    pids: HashMap<usize, u32>,
    kill: Shutdown,
}

impl WorkerPool {
    /// Pool re-executing the current program with the current arguments.
    pub fn for_current_exe(listener_fd: Option<i32>) -> Result<Self, PreforkError> {
        let program = std::env::current_exe().map_err(PreforkError::CurrentExe)?;
        Ok(Self::new(program, std::env::args_os().skip(1).collect(), listener_fd))
    }

    pub fn new(program: PathBuf, args: Vec<OsString>, listener_fd: Option<i32>) -> Self {
        Self {
            program,
            args,
            listener_fd,
            running: JoinSet::new(),
            pids: HashMap::new(),
            kill: Shutdown::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.pids.values().copied().collect()
    }

    /// Start worker number `id`.
    pub fn spawn(&mut self, id: usize) -> Result<(), PreforkError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env(CHILD_ENV, "1")
            .env(WORKER_ID_ENV, id.to_string())
            .kill_on_drop(true);
        if let Some(fd) = self.listener_fd {
            command.env(LISTENER_FD_ENV, fd.to_string());
        }

        let mut child = command
            .spawn()
            .map_err(|source| PreforkError::Spawn { id, source })?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.pids.insert(id, pid);
        }
        tracing::info!(worker = id, pid = ?pid, "Worker started");
        metrics::set_workers(self.pids.len());

        let kill = self.kill.clone();
        self.running.spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = kill.wait() => {
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            (id, pid, status)
        });
        Ok(())
    }

    /// Wait for the next worker to exit. `None` once no worker is running.
    pub async fn next_exit(&mut self) -> Option<WorkerExit> {
        loop {
            match self.running.join_next().await? {
                Ok(exit) => {
                    self.pids.remove(&exit.0);
                    metrics::set_workers(self.pids.len());
                    return Some(exit);
                }
                Err(e) => tracing::error!(error = %e, "Worker supervision task failed"),
            }
        }
    }

    /// Ask every worker to stop and wait for them, killing whatever is still
    /// running after `timeout`.
    pub async fn stop(&mut self, timeout: Duration) {
        for (id, pid) in &self.pids {
            tracing::debug!(worker = id, pid, "Sending SIGTERM to worker");
            terminate(*pid);
        }

        let drained = tokio::time::timeout(timeout, async {
            while let Some((id, pid, status)) = self.next_exit().await {
                log_exit(id, pid, &status);
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(remaining = self.pids.len(), "Workers still running after timeout; killing");
            self.kill.trigger();
            while let Some((id, pid, status)) = self.next_exit().await {
                log_exit(id, pid, &status);
            }
        }
        tracing::info!("All workers stopped");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("program", &self.program)
            .field("workers", &self.pids)
            .finish()
    }
}

#[cfg(unix)]
fn terminate(pid: u32) {
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

fn log_exit(id: usize, pid: Option<u32>, status: &std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => tracing::info!(worker = id, pid = ?pid, "Worker exited"),
        Ok(status) => tracing::warn!(worker = id, pid = ?pid, %status, "Worker exited with failure"),
        Err(e) => tracing::warn!(worker = id, pid = ?pid, error = %e, "Failed to wait for worker"),
    }
}

/// Run the master loop: keep `workers` processes alive until `shutdown`,
/// replacing crashed ones until the crash budget is spent.
pub async fn run_master(
    config: &ProcessConfig,
    mut pool: WorkerPool,
    shutdown: Shutdown,
) -> Result<(), PreforkError> {
    let workers = config.workers();
    let threshold = config.recover_threshold(workers);
    tracing::info!(workers, recover_threshold = threshold, "Prefork master starting workers");

    for id in 0..workers {
        if let Err(e) = pool.spawn(id) {
            pool.stop(Duration::ZERO).await;
            return Err(e);
        }
    }

    let mut crashes = 0usize;
    let result = loop {
        tokio::select! {
            _ = shutdown.wait() => break Ok(()),
            exit = pool.next_exit() => {
                let Some((id, pid, status)) = exit else {
                    break Ok(());
                };
                log_exit(id, pid, &status);
                if shutdown.is_triggered() {
                    break Ok(());
                }

                crashes += 1;
                if crashes > threshold {
                    tracing::error!(crashes, threshold, "Too many worker crashes; giving up");
                    break Err(PreforkError::TooManyCrashes { crashes, threshold });
                }
                let delay = calculate_backoff(crashes as u32, RESTART_BASE_MS, RESTART_MAX_MS);
                tracing::warn!(worker = id, crashes, delay = ?delay, "Restarting worker");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.wait() => break Ok(()),
                }
                if let Err(e) = pool.spawn(id) {
                    break Err(e);
                }
            }
        }
    };

    let grace = if config.graceful_shutdown {
        config.shutdown_timeout() + STOP_GRACE
    } else {
        STOP_GRACE
    };
    tracing::info!(workers = pool.len(), timeout = ?grace, "Stopping workers");
    pool.stop(grace).await;
    result
}

/// Trigger `shutdown` when the master process goes away.
#[cfg(unix)]
pub fn watch_master(shutdown: Shutdown) {
    let master = std::os::unix::process::parent_id();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if std::os::unix::process::parent_id() != master {
                        tracing::warn!(master, "Prefork master is gone; shutting down");
                        shutdown.trigger();
                        return;
                    }
                }
                _ = shutdown.wait() => return,
            }
        }
    });
}

#[cfg(not(unix))]
pub fn watch_master(_shutdown: Shutdown) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> WorkerPool {
        WorkerPool::new(
            PathBuf::from("/bin/sh"),
            vec![OsString::from("-c"), OsString::from(script)],
            None,
        )
    }

    #[tokio::test]
    async fn crashing_workers_exhaust_the_budget() {
        let config = ProcessConfig {
            prefork: true,
            prefork_workers: 2,
            prefork_recover_threshold: 2,
            ..ProcessConfig::default()
        };

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            run_master(&config, sh("exit 3"), Shutdown::new()),
        )
        .await
        .unwrap();

        match result {
            Err(PreforkError::TooManyCrashes { crashes, threshold }) => {
                assert_eq!(crashes, 3);
                assert_eq!(threshold, 2);
            }
            other => panic!("expected crash budget error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_terminates_workers() {
        let config = ProcessConfig {
            prefork: true,
            prefork_workers: 3,
            shutdown_timeout_secs: 1,
            ..ProcessConfig::default()
        };
        let shutdown = Shutdown::new();
        let master = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { run_master(&config, sh("sleep 30"), shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.trigger();

        let result = tokio::time::timeout(Duration::from_secs(5), master)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn workers_get_prefork_environment() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("env");
        let script = format!(
            "echo \"${}:${}:${}\" > {}",
            CHILD_ENV,
            WORKER_ID_ENV,
            LISTENER_FD_ENV,
            out.display()
        );
        let mut pool = WorkerPool::new(
            PathBuf::from("/bin/sh"),
            vec![OsString::from("-c"), OsString::from(script)],
            Some(7),
        );

        pool.spawn(4).unwrap();
        let (id, _, status) = pool.next_exit().await.unwrap();
        assert_eq!(id, 4);
        assert!(status.unwrap().success());
        assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "1:4:7");
        assert!(pool.is_empty());
    }
}
