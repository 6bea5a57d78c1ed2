// src/state/mod.rs
pub mod mock;
pub mod traits;

pub use mock::MockStateBackend;
pub use traits::{RateLimitOptions, SetMode, StateBackend, StateKey};
