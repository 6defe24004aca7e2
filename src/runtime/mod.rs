pub mod context;
pub mod definition;
pub mod engine;
pub mod expr;
pub mod instance;
pub mod node;
pub mod redis_storage;
pub mod snapshot;
pub mod storage;
pub mod syscall;
pub mod task;
