use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// A single progress report from a long-running operation.
///
/// Workers post one report per unit of work (file, plane, frame) and a
/// final report when finished or cancelled. The caller decides on which
/// thread the sink runs; posting synchronously is fine for tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
    pub message: String,
}

impl Progress {
    pub fn new(done: usize, total: usize, message: impl Into<String>) -> Self {
        Self {
            done,
            total,
            message: message.into(),
        }
    }
}

/// Callback receiving [`Progress`] reports.
pub type ProgressSink<'a> = &'a (dyn Fn(Progress) + Sync);

/// Cooperative cancellation flag shared between a caller and a worker.
///
/// Workers poll the token at their suspension points (between files,
/// between planes, between frames). An observed cancel makes the worker
/// post a final `"cancelled"` report and return [`Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The operation observed a cancel request and stopped before publishing
/// a result. Partial artifacts are discarded.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Posts to the sink if one is attached.
pub(crate) fn post(sink: Option<ProgressSink<'_>>, done: usize, total: usize, message: &str) {
    if let Some(sink) = sink {
        sink(Progress::new(done, total, message));
    }
}

/// Polls the token and posts the final `"cancelled"` report on cancel.
pub(crate) fn check_cancelled(
    token: &CancelToken,
    sink: Option<ProgressSink<'_>>,
    done: usize,
    total: usize,
) -> Result<(), Cancelled> {
    if token.is_cancelled() {
        post(sink, done, total, "cancelled");
        return Err(Cancelled);
    }
    Ok(())
}
