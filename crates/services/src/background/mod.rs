pub mod retention;
pub mod task_service;
pub mod task_store;

pub use retention::RetentionSweeper;
pub use task_service::{
    PipelineError, PipelineSettings, RestorationMode, SubmitError, SubmitRequest,
    TranscriptionService,
};
pub use task_store::{RegistryError, TaskRegistry, TaskSnapshot};
