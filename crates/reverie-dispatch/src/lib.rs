//! # reverie-dispatch
//!
//! Batch dispatch engine: plans job combinations, submits them through the
//! out-of-process queue boundary, polls the shared result store for
//! completions, and materializes finished artifacts into a playlist or a
//! local folder.
//!
//! The orchestrator composes four independently testable pieces: the
//! [`Submitter`] boundary, the [`ResultStore`] poller, the dedup ledger, and
//! the [`Materializer`].

pub mod ledger;
pub mod materialize;
pub mod orchestrator;
pub mod results;
pub mod submit;

pub use ledger::known_fingerprints;
pub use materialize::{Destination, JobContext, Materializer};
pub use orchestrator::{
    plan_jobs, BatchOrchestrator, BatchReport, OrchestratorConfig, PlannedJob,
};
pub use results::{poll, RedisResultStore, ResultStore};
pub use submit::{parse_handle, CommandSubmitter, Submitter};
