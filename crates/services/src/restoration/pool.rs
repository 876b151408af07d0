use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tracing::{debug, info, warn};

use super::worker::WorkerHandle;
use super::{RestorationError, WorkerConfig, WorkerError};

struct RestorationRequest {
    task_id: String,
    text: String,
    reply: oneshot::Sender<Result<String, RestorationError>>,
}

type Dispatch = (OwnedSemaphorePermit, RestorationRequest);

struct Slot {
    handle: Arc<WorkerHandle>,
    /// Set once this slot's permit has been taken out of circulation.
    retired: AtomicBool,
}

/// Outcome of looking for a worker while holding a permit.
enum Claim<'a> {
    Worker(&'a Slot),
    /// No idle worker, but this one has exited and still owns a permit.
    Dead(&'a Slot),
    Busy,
    Exhausted,
}

struct PoolInner {
    slots: Vec<Slot>,
    /// One permit per live worker. A permit is held from dispatch until the
    /// worker is idle again, and is forgotten when its worker exits.
    permits: Arc<Semaphore>,
    /// Requests that found no free permit, oldest first. Permits are only ever
    /// acquired while this lock is held, so a non-empty queue means every
    /// permit is out.
    queue: Mutex<VecDeque<RestorationRequest>>,
    closing: AtomicBool,
    ceiling_wait: Duration,
}

/// Fixed-size pool of restoration workers with FIFO overflow.
#[derive(Clone)]
pub struct RestorationPool {
    inner: Arc<PoolInner>,
}

impl RestorationPool {
    /// Runs the bootstrap commands, then starts `pool_size` workers one after another.
    /// Any failure tears down what was started and is returned as a startup error.
    pub async fn configure(config: &WorkerConfig) -> Result<Self, RestorationError> {
        run_bootstrap(&config.working_dir, &config.bootstrap_commands).await?;

        let mut handles = Vec::with_capacity(config.pool_size);
        for i in 0..config.pool_size {
            match WorkerHandle::start(format!("restorer-{}", i), config).await {
                Ok(handle) => {
                    info!(worker_id = %handle.id(), "Restoration worker {} created", i);
                    handles.push(Arc::new(handle));
                }
                Err(e) => {
                    for handle in &handles {
                        handle.destroy().await;
                    }
                    return Err(RestorationError::Worker(WorkerError::Startup(format!(
                        "Failed to create restoration worker {}: {}",
                        i, e
                    ))));
                }
            }
        }

        Ok(Self::from_handles(handles, config.ceiling_wait))
    }

    fn from_handles(handles: Vec<Arc<WorkerHandle>>, ceiling_wait: Duration) -> Self {
        let size = handles.len();
        let slots = handles
            .into_iter()
            .map(|handle| Slot {
                handle,
                retired: AtomicBool::new(false),
            })
            .collect();
        Self {
            inner: Arc::new(PoolInner {
                slots,
                permits: Arc::new(Semaphore::new(size)),
                queue: Mutex::new(VecDeque::new()),
                closing: AtomicBool::new(false),
                ceiling_wait,
            }),
        }
    }

    /// Restores `text`, waiting at most the ceiling wait including queue time.
    pub async fn submit(&self, text: String, task_id: String) -> Result<String, RestorationError> {
        let (reply, rx) = oneshot::channel();
        let request = RestorationRequest {
            task_id: task_id.clone(),
            text,
            reply,
        };

        {
            let mut queue = self.inner.queue.lock();
            if self.inner.closing.load(Ordering::SeqCst) {
                return Err(RestorationError::PoolClosed);
            }
            if self.inner.exhausted() {
                return Err(all_workers_exited());
            }
            let permit = if queue.is_empty() {
                Arc::clone(&self.inner.permits).try_acquire_owned().ok()
            } else {
                None
            };
            match permit {
                Some(permit) => {
                    tokio::spawn(drive(Arc::clone(&self.inner), permit, request));
                }
                None => {
                    queue.push_back(request);
                    debug!(%task_id, queued = queue.len(), "Restoration request queued");
                }
            }
        }

        let ceiling = self.inner.ceiling_wait;
        match tokio::time::timeout(ceiling, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RestorationError::PoolClosed),
            Err(_) => {
                warn!(%task_id, ?ceiling, "Restoration exceeded ceiling wait");
                Err(RestorationError::Timeout(ceiling))
            }
        }
    }

    pub fn size(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Workers whose process is still running.
    pub fn live_workers(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|s| !s.handle.is_closed())
            .count()
    }

    /// Stops admitting, fails everything still queued, then destroys every worker.
    pub async fn shutdown(&self) {
        let abandoned: Vec<RestorationRequest> = {
            let mut queue = self.inner.queue.lock();
            if self.inner.closing.swap(true, Ordering::SeqCst) {
                return;
            }
            self.inner.permits.close();
            queue.drain(..).collect()
        };
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Failing queued restoration requests on shutdown");
        }
        for request in abandoned {
            let _ = request.reply.send(Err(RestorationError::PoolClosed));
        }

        for slot in &self.inner.slots {
            slot.handle.destroy().await;
        }
        info!("Restoration pool shut down");
    }
}

fn all_workers_exited() -> RestorationError {
    RestorationError::Worker(WorkerError::Communication(
        "all restoration workers have exited".to_string(),
    ))
}

/// Runs one request, then keeps pulling from the queue for as long as a
/// permit can be re-taken.
async fn drive(inner: Arc<PoolInner>, permit: OwnedSemaphorePermit, request: RestorationRequest) {
    let mut next = Some((permit, request));
    while let Some((permit, request)) = next.take() {
        next = inner.run(permit, request).await;
    }
}

impl PoolInner {
    async fn run(
        &self,
        permit: OwnedSemaphorePermit,
        request: RestorationRequest,
    ) -> Option<Dispatch> {
        if request.reply.is_closed() {
            debug!(task_id = %request.task_id, "Skipping abandoned restoration request");
            return self.release(permit);
        }

        match self.claim() {
            Claim::Worker(slot) => {
                let handle = &slot.handle;
                debug!(
                    task_id = %request.task_id,
                    worker_id = %handle.id(),
                    "Dispatching restoration"
                );
                let result = handle
                    .send(&request.text, &request.task_id)
                    .await
                    .map_err(RestorationError::Worker);
                if let Err(e) = &result {
                    warn!(task_id = %request.task_id, error = %e, "Restoration request failed");
                }
                if request.reply.send(result).is_err() {
                    debug!(task_id = %request.task_id, "Caller gave up before the result arrived");
                }

                // A timed-out worker is still busy; its permit stays out until it answers
                handle.settled().await;
                if handle.is_closed() {
                    self.retire(slot, permit);
                    let mut queue = self.queue.lock();
                    self.next_locked(&mut queue)
                } else {
                    self.release(permit)
                }
            }
            Claim::Dead(slot) => {
                self.retire(slot, permit);
                let mut queue = self.queue.lock();
                self.requeue(&mut queue, request);
                self.next_locked(&mut queue)
            }
            Claim::Busy => {
                // Every live worker is mid-request; the first to settle picks this up
                let mut queue = self.queue.lock();
                self.requeue(&mut queue, request);
                drop(permit);
                None
            }
            Claim::Exhausted => {
                let abandoned: Vec<RestorationRequest> = {
                    let mut queue = self.queue.lock();
                    drop(permit);
                    queue.drain(..).collect()
                };
                warn!(
                    task_id = %request.task_id,
                    queued = abandoned.len(),
                    "All restoration workers have exited"
                );
                for request in std::iter::once(request).chain(abandoned) {
                    let _ = request.reply.send(Err(all_workers_exited()));
                }
                None
            }
        }
    }

    /// Picks the first idle worker. No respawn: once every process has
    /// exited, requests fail immediately.
    fn claim(&self) -> Claim<'_> {
        if let Some(slot) = self.slots.iter().find(|s| s.handle.try_claim()) {
            return Claim::Worker(slot);
        }
        if self.exhausted() {
            return Claim::Exhausted;
        }
        match self
            .slots
            .iter()
            .find(|s| s.handle.is_closed() && !s.retired.load(Ordering::SeqCst))
        {
            Some(slot) => Claim::Dead(slot),
            None => Claim::Busy,
        }
    }

    fn exhausted(&self) -> bool {
        self.slots.iter().all(|s| s.handle.is_closed())
    }

    /// Takes one permit out of circulation for an exited worker. Only the
    /// first caller per slot forgets its permit; later ones just drop theirs.
    fn retire(&self, slot: &Slot, permit: OwnedSemaphorePermit) {
        if !slot.retired.swap(true, Ordering::SeqCst) {
            permit.forget();
            warn!(
                worker_id = %slot.handle.id(),
                capacity = self.slots.len() - self.retired_count(),
                "Restoration worker exited, pool capacity reduced"
            );
        }
    }

    fn retired_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.retired.load(Ordering::SeqCst))
            .count()
    }

    fn requeue(&self, queue: &mut VecDeque<RestorationRequest>, request: RestorationRequest) {
        if self.closing.load(Ordering::SeqCst) {
            let _ = request.reply.send(Err(RestorationError::PoolClosed));
        } else {
            queue.push_front(request);
        }
    }

    fn release(&self, permit: OwnedSemaphorePermit) -> Option<Dispatch> {
        let mut queue = self.queue.lock();
        drop(permit);
        self.next_locked(&mut queue)
    }

    fn next_locked(&self, queue: &mut VecDeque<RestorationRequest>) -> Option<Dispatch> {
        while let Some(request) = queue.pop_front() {
            if request.reply.is_closed() {
                debug!(task_id = %request.task_id, "Dropping abandoned queued request");
                continue;
            }
            return match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => Some((permit, request)),
                Err(_) => {
                    queue.push_front(request);
                    None
                }
            };
        }
        None
    }
}

async fn run_bootstrap(
    working_dir: &Path,
    commands: &[Vec<String>],
) -> Result<(), RestorationError> {
    for command in commands {
        let Some((program, args)) = command.split_first() else {
            continue;
        };
        info!(command = %command.join(" "), "Running restoration bootstrap step");
        let status = Command::new(program)
            .args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                WorkerError::Startup(format!("bootstrap `{}`: {}", command.join(" "), e))
            })?;
        if !status.success() {
            return Err(WorkerError::Startup(format!(
                "bootstrap `{}` exited with {}",
                command.join(" "),
                status
            ))
            .into());
        }
    }
    Ok(())
}
