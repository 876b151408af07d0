use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex as AsyncMutex, Notify, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::protocol::{self, WorkerResponse};
use super::{WorkerConfig, WorkerError};

/// How long a worker gets to exit on its own after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type Reply = oneshot::Sender<Result<WorkerResponse, WorkerError>>;

struct Pending {
    task_id: String,
    reply: Reply,
}

/// State shared between a handle and its stdout reader. The reader is the
/// only party that moves a handle from busy back to available.
struct Channel {
    pending: Mutex<Option<Pending>>,
    available: AtomicBool,
    closed: AtomicBool,
    /// Woken whenever the handle becomes available or closes.
    settled: Notify,
}

impl Channel {
    fn new() -> Self {
        Self {
            pending: Mutex::new(None),
            available: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            settled: Notify::new(),
        }
    }

    fn is_settled(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.available.load(Ordering::SeqCst)
    }

    fn resolve(&self, worker_id: &str, response: WorkerResponse) {
        let Some(pending) = self.pending.lock().take() else {
            warn!(
                worker_id,
                task_id = %response.task_id,
                "Discarding response with no request outstanding"
            );
            return;
        };
        if pending.task_id != response.task_id {
            warn!(
                worker_id,
                expected = %pending.task_id,
                received = %response.task_id,
                "Worker answered with a different taskId"
            );
        }

        // Flip before waking the caller so the pool sees the handle free again.
        if !self.closed.load(Ordering::SeqCst) {
            self.available.store(true, Ordering::SeqCst);
        }
        self.settled.notify_waiters();
        if pending.reply.send(Ok(response)).is_err() {
            debug!(worker_id, task_id = %pending.task_id, "Late response discarded");
        }
    }

    fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.store(false, Ordering::SeqCst);
        if let Some(pending) = self.pending.lock().take() {
            let _ = pending
                .reply
                .send(Err(WorkerError::Communication(reason.to_string())));
        }
        self.settled.notify_waiters();
    }
}

/// One long-lived restoration worker process.
///
/// At most one request is outstanding at a time. Callers claim the handle with
/// [`WorkerHandle::try_claim`] before calling [`WorkerHandle::send`].
pub struct WorkerHandle {
    id: String,
    pid: Option<u32>,
    channel: Arc<Channel>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    child: AsyncMutex<Option<Child>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    destroyed: AtomicBool,
    max_processing: Duration,
}

impl WorkerHandle {
    /// Spawns the worker and waits for it to answer a liveness probe.
    pub async fn start(id: impl Into<String>, config: &WorkerConfig) -> Result<Self, WorkerError> {
        let id = id.into();
        let (program, args) = config
            .launch_command
            .split_first()
            .ok_or_else(|| WorkerError::Startup("launch command is empty".to_string()))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WorkerError::Startup(format!("spawn {}: {}", program, e)))?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WorkerError::Startup("worker stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::Startup("worker stdout not captured".to_string()))?;

        let channel = Arc::new(Channel::new());
        let mut tasks = vec![tokio::spawn(read_responses(
            id.clone(),
            stdout,
            Arc::clone(&channel),
        ))];
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(log_stderr(id.clone(), stderr)));
        }

        let handle = Self {
            id,
            pid,
            channel,
            stdin: AsyncMutex::new(Some(stdin)),
            child: AsyncMutex::new(Some(child)),
            tasks: Mutex::new(tasks),
            destroyed: AtomicBool::new(false),
            max_processing: config.max_processing,
        };

        if let Err(e) = handle.probe(config.startup_timeout).await {
            handle.destroy().await;
            return Err(WorkerError::Startup(format!(
                "worker {} failed liveness probe: {}",
                handle.id, e
            )));
        }

        info!(worker_id = %handle.id, pid = ?handle.pid, "Restoration worker started");
        Ok(handle)
    }

    async fn probe(&self, wait: Duration) -> Result<(), WorkerError> {
        if !self.try_claim() {
            return Err(WorkerError::Busy);
        }
        // Any correlated response proves the worker is reading and answering.
        self.exchange(protocol::PROBE_TEXT, protocol::PROBE_TASK_ID, wait)
            .await
            .map(|_| ())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True iff no request is outstanding and the process is still alive.
    pub fn is_available(&self) -> bool {
        !self.is_closed() && self.channel.available.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.channel.closed.load(Ordering::SeqCst)
    }

    /// Atomically takes the handle for one request.
    pub fn try_claim(&self) -> bool {
        !self.is_closed()
            && self
                .channel
                .available
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Resolves once the handle is available again or its process has gone.
    ///
    /// After a timed-out request this is when the worker's late answer arrives.
    pub async fn settled(&self) {
        loop {
            let notified = self.channel.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.channel.is_settled() {
                return;
            }
            notified.await;
        }
    }

    /// Sends `text` for restoration and waits up to the processing budget.
    ///
    /// On timeout the handle stays busy until the worker's late answer arrives;
    /// that answer is then discarded and the handle becomes available again.
    pub async fn send(&self, text: &str, task_id: &str) -> Result<String, WorkerError> {
        self.exchange(text, task_id, self.max_processing)
            .await?
            .into_result()
    }

    async fn exchange(
        &self,
        text: &str,
        task_id: &str,
        wait: Duration,
    ) -> Result<WorkerResponse, WorkerError> {
        if self.is_closed() {
            return Err(WorkerError::Communication(
                "worker process has exited".to_string(),
            ));
        }

        let line = match protocol::encode_request(text, task_id) {
            Ok(line) => line,
            Err(e) => {
                self.channel.available.store(true, Ordering::SeqCst);
                self.channel.settled.notify_waiters();
                return Err(e);
            }
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.channel.pending.lock();
            if pending.is_some() {
                return Err(WorkerError::Busy);
            }
            *pending = Some(Pending {
                task_id: task_id.to_string(),
                reply: tx,
            });
        }
        self.channel.available.store(false, Ordering::SeqCst);

        // The reader may have closed between the check above and registering.
        if self.is_closed() && self.channel.pending.lock().take().is_some() {
            return Err(WorkerError::Communication(
                "worker process has exited".to_string(),
            ));
        }

        if let Err(e) = self.write_line(&line).await {
            warn!(
                worker_id = %self.id,
                task_id,
                error = %e,
                "Failed to write to restoration worker"
            );
            self.channel.close(&format!("write request: {}", e));
            return Err(WorkerError::Communication(format!("write request: {}", e)));
        }
        debug!(worker_id = %self.id, task_id, bytes = line.len(), "Request sent to worker");

        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WorkerError::Communication(
                "request dropped without a response".to_string(),
            )),
            Err(_) => {
                warn!(worker_id = %self.id, task_id, ?wait, "Restoration worker timed out");
                Err(WorkerError::Timeout(wait))
            }
        }
    }

    async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin is closed")
        })?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    }

    /// Closes both streams and terminates the process. Safe to call repeatedly.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.channel.close("worker destroyed");

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                debug!(worker_id = %self.id, error = %e, "Closing worker stdin failed");
            }
        }

        if let Some(mut child) = self.child.lock().await.take() {
            match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!(worker_id = %self.id, %status, "Worker exited"),
                Ok(Err(e)) => warn!(worker_id = %self.id, error = %e, "Waiting for worker failed"),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        warn!(worker_id = %self.id, error = %e, "Killing worker failed");
                    }
                }
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
        }
        info!(worker_id = %self.id, "Restoration worker destroyed");
    }
}

async fn read_responses(worker_id: String, stdout: ChildStdout, channel: Arc<Channel>) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    let reason = loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break "worker closed its output stream".to_string(),
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                match protocol::decode_line(&line) {
                    Some(response) => channel.resolve(&worker_id, response),
                    None => {
                        debug!(worker_id = %worker_id, line = %line.trim_end(), "Worker output")
                    }
                }
            }
            Err(e) => break format!("reading worker output: {}", e),
        }
    };

    if !channel.closed.load(Ordering::SeqCst) {
        warn!(worker_id = %worker_id, %reason, "Restoration worker stopped");
    }
    channel.close(&reason);
}

async fn log_stderr(worker_id: String, stderr: impl AsyncRead + Unpin) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                debug!(worker_id = %worker_id, "{}", String::from_utf8_lossy(&buf).trim_end());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::restoration::testing::{self, DIE_AFTER_PROBE, ECHO, NOISY, REJECT, SILENT};

    async fn start(
        script: &str,
        tweak: impl FnOnce(&mut WorkerConfig),
    ) -> (tempfile::TempDir, Result<WorkerHandle, WorkerError>) {
        let dir = tempfile::tempdir().unwrap();
        let path = testing::write_script(dir.path(), "worker.sh", script);
        let mut config = testing::config(dir.path(), &path, 1);
        tweak(&mut config);
        let handle = WorkerHandle::start("w0", &config).await;
        (dir, handle)
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let (_dir, handle) = start(ECHO, |_| {}).await;
        let handle = handle.unwrap();
        assert!(handle.is_available());

        assert!(handle.try_claim());
        assert!(!handle.is_available());
        assert!(!handle.try_claim());

        let restored = handle.send("hello world", "a").await.unwrap();
        assert_eq!(restored, "hello world");
        assert!(handle.is_available());
        handle.destroy().await;
    }

    #[tokio::test]
    async fn non_protocol_output_is_ignored() {
        let (_dir, handle) = start(NOISY, |_| {}).await;
        let handle = handle.unwrap();
        for i in 0..3 {
            assert!(handle.try_claim());
            let restored = handle.send("foo bar", &format!("t{}", i)).await.unwrap();
            assert_eq!(restored, "foo bar.");
        }
        handle.destroy().await;
    }

    #[tokio::test]
    async fn worker_reported_failure_is_rejected() {
        let (_dir, handle) = start(REJECT, |_| {}).await;
        let handle = handle.unwrap();
        assert!(handle.try_claim());
        let err = handle.send("text", "a").await.unwrap_err();
        assert!(matches!(err, WorkerError::Rejected(ref m) if m == "model not loaded"));
        assert!(handle.is_available());
        handle.destroy().await;
    }

    #[tokio::test]
    async fn silent_worker_fails_startup() {
        let (_dir, handle) =
            start(SILENT, |c| c.startup_timeout = Duration::from_millis(300)).await;
        assert!(matches!(handle, Err(WorkerError::Startup(_))));
    }

    #[tokio::test]
    async fn unspawnable_worker_fails_startup() {
        let (_dir, handle) = start(ECHO, |c| {
            c.launch_command = vec!["/nonexistent/worker-binary".to_string()];
        })
        .await;
        assert!(matches!(handle, Err(WorkerError::Startup(_))));
    }

    #[tokio::test]
    async fn exit_before_response_is_a_communication_error() {
        let (_dir, handle) = start(DIE_AFTER_PROBE, |_| {}).await;
        let handle = handle.unwrap();
        assert!(handle.try_claim());
        let err = handle.send("hello", "a").await.unwrap_err();
        assert!(matches!(err, WorkerError::Communication(_)), "{:?}", err);
        assert!(handle.is_closed());
        assert!(!handle.try_claim());
        handle.destroy().await;
    }

    #[tokio::test]
    async fn timed_out_handle_recovers_after_late_response() {
        let (_dir, handle) = start(ECHO, |c| c.max_processing = Duration::from_millis(200)).await;
        let handle = handle.unwrap();

        assert!(handle.try_claim());
        let err = handle.send("sleep:1", "slow").await.unwrap_err();
        assert!(matches!(err, WorkerError::Timeout(_)));
        assert!(!handle.is_available());
        assert!(!handle.is_closed());

        tokio::time::timeout(Duration::from_secs(3), handle.settled())
            .await
            .unwrap();
        assert!(handle.is_available());

        assert!(handle.try_claim());
        assert_eq!(handle.send("after", "next").await.unwrap(), "after");
        handle.destroy().await;
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_fails_later_sends() {
        let (_dir, handle) = start(ECHO, |_| {}).await;
        let handle = handle.unwrap();
        handle.destroy().await;
        handle.destroy().await;

        assert!(handle.is_closed());
        assert!(!handle.try_claim());
        let err = handle.send("hello", "a").await.unwrap_err();
        assert!(matches!(err, WorkerError::Communication(_)));
    }
}
