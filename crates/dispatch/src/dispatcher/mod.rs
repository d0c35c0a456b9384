//! Thread-affine dispatcher -- a FIFO of work items drained by one owner thread.
//!
//! Split into focused submodules:
//! - `core`: Dispatcher struct, construction, affinity checks, state accessors, disposal
//! - `pump`: the blocking run loop and per-item execution
//! - `invoke`: submitting callables from any thread

mod core;
mod invoke;
mod pump;

pub use self::core::{Dispatcher, DispatcherId};
