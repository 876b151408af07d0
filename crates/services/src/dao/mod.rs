pub mod base;
pub mod task;

pub use base::{BaseDao, DaoError, DaoResult};
pub use task::{MemoryTaskRepository, MongoTaskRepository, TaskRepository};
