// src/exec/mod.rs

//! Task execution layer.
//!
//! Jobs fan out into [`Task`]s and hand them to a [`TaskBackend`]. The
//! production backend batches tasks and dispatches each batch, serialized,
//! through a single worker to a [`BatchDispatcher`].
//!
//! - [`task`] defines tasks and their serialized request/result forms.
//! - [`backend`] provides the `TaskBackend` trait.
//! - [`pool`] is the batching `PoolTaskBackend`.
//! - [`batch`] defines batch payloads and the `BatchDispatcher` trait.
//! - [`dispatch_loop`] owns the single dispatch worker.
//! - [`task_runner`] runs client scripts as local processes.

pub mod backend;
pub mod batch;
pub mod dispatch_loop;
pub mod pool;
pub mod task;
pub mod task_runner;

pub use backend::TaskBackend;
pub use batch::{BatchDispatcher, BatchPayload, BatchResults};
pub use pool::{DEFAULT_TASK_BATCH_SIZE, PoolTaskBackend};
pub use task::{Task, TaskRequest, TaskResult};
pub use task_runner::ProcessDispatcher;
