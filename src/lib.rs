pub mod compiler;
pub mod dsl;
pub mod error;
pub mod hooks;
pub mod nodes;
pub mod runtime;

pub use error::{EngineError, Result, StoreError};
pub use runtime::engine::{Engine, EngineConfig};
