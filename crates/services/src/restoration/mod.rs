//! Punctuation restoration backed by a fixed pool of external worker processes.
//!
//! Each worker speaks a line-delimited JSON protocol on stdin/stdout and has at
//! most one request in flight. The pool bounds concurrency with a semaphore and
//! parks overflow in a FIFO queue that is drained as workers complete.

pub mod pool;
pub mod protocol;
pub mod worker;

use std::path::PathBuf;
use std::time::Duration;

use scribe_config::PunctuationSettings;
use thiserror::Error;

pub use pool::RestorationPool;
pub use worker::WorkerHandle;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker failed to start: {0}")]
    Startup(String),
    #[error("worker communication failed: {0}")]
    Communication(String),
    #[error("worker did not respond within {0:?}")]
    Timeout(Duration),
    #[error("worker reported an error: {0}")]
    Rejected(String),
    #[error("worker already has a request in flight")]
    Busy,
}

#[derive(Debug, Error)]
pub enum RestorationError {
    #[error(transparent)]
    Worker(#[from] WorkerError),
    #[error("restoration did not complete within {0:?}")]
    Timeout(Duration),
    #[error("restoration pool is shut down")]
    PoolClosed,
}

/// How to launch and talk to restoration workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub working_dir: PathBuf,
    pub launch_command: Vec<String>,
    pub bootstrap_commands: Vec<Vec<String>>,
    /// Budget for one worker to answer one request.
    pub max_processing: Duration,
    /// Overall wait for a submitted request, queue time included.
    pub ceiling_wait: Duration,
    pub startup_timeout: Duration,
}

impl From<&PunctuationSettings> for WorkerConfig {
    fn from(settings: &PunctuationSettings) -> Self {
        Self {
            pool_size: settings.pool_size,
            working_dir: PathBuf::from(&settings.working_dir),
            launch_command: settings.launch_command.clone(),
            bootstrap_commands: settings.bootstrap_commands.clone(),
            max_processing: Duration::from_secs(settings.max_processing_secs),
            ceiling_wait: Duration::from_secs(settings.ceiling_wait_secs),
            startup_timeout: Duration::from_secs(settings.startup_timeout_secs),
        }
    }
}
