pub mod background;
pub mod dao;
pub mod export;
pub mod restoration;

pub use background::{RetentionSweeper, TaskRegistry, TaskSnapshot, TranscriptionService};
pub use dao::*;
pub use restoration::RestorationPool;
