//! Run work on a designated owner thread from anywhere.
//!
//! A [`Dispatcher`] belongs to one thread. Other threads hand it callables
//! through [`Dispatcher::invoke_async`] and get a [`DispatchFuture`] back;
//! the owner thread sits in [`Dispatcher::run`] and executes the queue in
//! order until its [`CancelToken`] is cancelled. A [`DispatcherRegistry`]
//! finds (or lazily creates) the dispatcher for a given thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::thread;
//!
//! use affinity_dispatch::{CancelToken, DispatcherRegistry};
//!
//! let registry = Arc::new(DispatcherRegistry::new());
//! let token = CancelToken::new();
//!
//! let owner = {
//!     let registry = registry.clone();
//!     let token = token.clone();
//!     thread::spawn(move || registry.current().run(token))
//! };
//!
//! let dispatcher = registry.dispatcher_for(owner.thread().id());
//! let answer = dispatcher.invoke_async(|| 6 * 7).wait();
//! assert_eq!(answer, Ok(42));
//!
//! token.cancel();
//! owner.join().unwrap().unwrap();
//! ```

pub mod cancel;
pub mod dispatcher;
pub mod future;
pub mod metrics;
pub mod registry;
pub mod signal;
pub mod work_item;

pub use affinity_core::{DispatchConfig, DispatchError};
pub use cancel::CancelToken;
pub use dispatcher::{Dispatcher, DispatcherId};
pub use future::DispatchFuture;
pub use metrics::DispatcherMetrics;
pub use registry::DispatcherRegistry;
pub use signal::WakeSignal;
pub use work_item::{ItemOutcome, WorkItem};
