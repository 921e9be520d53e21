//! Worker pool and completion tracking.
//!
//! ## Structure
//!
//! - [`manager`] - [`WorkerPool`](manager::WorkerPool), spawns workers and
//!   closes the result channel.
//! - `worker` - the per-range worker task.
//! - [`barrier`] - job-scoped completion barrier.
//! - [`report`] - per-worker and per-job accounting.

pub mod barrier;
pub mod manager;
pub mod report;
pub(crate) mod worker;
