// Background process registry

use crate::constants::{GRACEFUL_KILL_TIMEOUT, KILL_POLL_INTERVAL};
use crate::transport::split_pid_marker;
use castcheck_core::domain::Host;
use castcheck_core::port::{ExecutionError, ProcessHandle, Termination};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Buffer = Arc<Mutex<Vec<u8>>>;

/// One background child with continuously drained output
pub(crate) struct TrackedProcess {
    pub host: Host,
    child: Mutex<Child>,
    stdout: Buffer,
    stderr: Buffer,
    readers: Mutex<Vec<JoinHandle<()>>>,
    stop_requested: AtomicBool,
}

impl TrackedProcess {
    fn new(host: Host, mut child: Child) -> Self {
        let stdout = Buffer::default();
        let stderr = Buffer::default();
        let readers = [
            drain(child.stdout.take(), Arc::clone(&stdout)),
            drain(child.stderr.take(), Arc::clone(&stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            host,
            child: Mutex::new(child),
            stdout,
            stderr,
            readers: Mutex::new(readers),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Marks a stop request; true if one was already made
    pub fn request_stop(&self) -> bool {
        self.stop_requested.swap(true, Ordering::SeqCst)
    }

    pub async fn has_exited(&self) -> Result<bool, ExecutionError> {
        let mut child = self.child.lock().await;
        child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(|e| ExecutionError::Io(e.to_string()))
    }

    /// Pid the remote shell announced, waiting at most `max_wait` for it.
    /// `None` if the client exits or the deadline passes first.
    pub async fn remote_pid(&self, max_wait: Duration) -> Option<u32> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let announced = split_pid_marker(&String::from_utf8_lossy(&self.stdout.lock().await)).0;
            if announced.is_some() {
                return announced;
            }
            if tokio::time::Instant::now() >= deadline || self.has_exited().await.unwrap_or(true)
            {
                return None;
            }
            tokio::time::sleep(KILL_POLL_INTERVAL).await;
        }
    }

    /// Wait at most `max_wait` for the process to exit
    pub async fn wait_for_exit(&self, max_wait: Duration) -> std::io::Result<Option<ExitStatus>> {
        let mut child = self.child.lock().await;
        match tokio::time::timeout(max_wait, child.wait()).await {
            Ok(status) => status.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Let the readers reach EOF after exit, bounded by `max_wait`
    pub async fn drained(&self, max_wait: Duration) {
        let readers: Vec<_> = self.readers.lock().await.drain(..).collect();
        let _ = tokio::time::timeout(max_wait, async {
            for reader in readers {
                let _ = reader.await;
            }
        })
        .await;
    }

    /// Output captured so far, without the pid announcement
    pub async fn captured(&self) -> (String, String) {
        let raw = String::from_utf8_lossy(&self.stdout.lock().await).into_owned();
        let stdout = split_pid_marker(&raw).1.to_string();
        let stderr = String::from_utf8_lossy(&self.stderr.lock().await).into_owned();
        (stdout, stderr)
    }

    /// SIGTERM, then SIGKILL after the graceful timeout. Idempotent.
    pub async fn terminate(&self) -> Result<Termination, ExecutionError> {
        let mut child = self.child.lock().await;
        if child
            .try_wait()
            .map_err(|e| ExecutionError::Io(e.to_string()))?
            .is_some()
        {
            return Ok(Termination::AlreadyExited);
        }
        let Some(pid) = child.id() else {
            return Ok(Termination::AlreadyExited);
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            debug!(pid, host = %self.host.name, "Sending SIGTERM");
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %e, "SIGTERM failed");
            }

            let deadline = tokio::time::Instant::now() + GRACEFUL_KILL_TIMEOUT;
            while tokio::time::Instant::now() < deadline {
                tokio::time::sleep(KILL_POLL_INTERVAL).await;
                if child
                    .try_wait()
                    .map_err(|e| ExecutionError::Io(e.to_string()))?
                    .is_some()
                {
                    return Ok(Termination::Terminated);
                }
            }
            warn!(pid, host = %self.host.name, "Process did not exit after SIGTERM, sending SIGKILL");
        }

        child
            .kill()
            .await
            .map_err(|e| ExecutionError::Killed(e.to_string()))?;
        Ok(Termination::Terminated)
    }
}

fn drain<R>(reader: Option<R>, buffer: Buffer) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = reader?;
    Some(tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    }))
}

enum Slot {
    Live(Arc<TrackedProcess>),
    /// Stopped; child and buffers dropped, handle kept so stops stay idempotent
    Released,
}

#[derive(Default)]
pub(crate) struct ProcessRegistry {
    next_handle: AtomicU64,
    processes: Mutex<HashMap<ProcessHandle, Slot>>,
}

impl ProcessRegistry {
    pub async fn insert(&self, host: &Host, child: Child) -> ProcessHandle {
        let handle = ProcessHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        let tracked = Arc::new(TrackedProcess::new(host.clone(), child));
        self.processes.lock().await.insert(handle, Slot::Live(tracked));
        handle
    }

    /// `Ok(None)` for a handle that was already released
    pub async fn get(
        &self,
        handle: ProcessHandle,
    ) -> Result<Option<Arc<TrackedProcess>>, ExecutionError> {
        match self.processes.lock().await.get(&handle) {
            Some(Slot::Live(process)) => Ok(Some(Arc::clone(process))),
            Some(Slot::Released) => Ok(None),
            None => Err(ExecutionError::UnknownHandle(handle)),
        }
    }

    pub async fn release(&self, handle: ProcessHandle) {
        if let Some(slot) = self.processes.lock().await.get_mut(&handle) {
            *slot = Slot::Released;
        }
    }

    /// Processes still holding a child and its output
    #[cfg(test)]
    pub async fn live(&self) -> usize {
        self.processes
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }
}
