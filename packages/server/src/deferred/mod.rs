//! Deferred uploads: content changes a commit queued for the reconciliation
//! worker.

mod service;
mod worker;

pub use service::{DeferredUploadService, RetryResult};
pub use worker::{ReconciliationWorker, RunSummary, WorkerHandle, spawn_worker};
