//! Progress reporting and per-transfer options

use drivenet_core::ProgressState;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Progress callback: `(total_bytes, transferred_bytes)`
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Observer for pipeline state transitions
pub type StateFn<S> = Arc<dyn Fn(S) + Send + Sync>;

/// Caller-side knobs shared by both pipelines.
pub struct TransferOptions<S> {
    pub progress: Option<ProgressFn>,
    pub on_state: Option<StateFn<S>>,
    pub cancel: CancellationToken,
}

impl<S> TransferOptions<S> {
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_state_observer(mut self, on_state: StateFn<S>) -> Self {
        self.on_state = Some(on_state);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn emit(&self, state: S) {
        if let Some(observer) = &self.on_state {
            observer(state);
        }
    }
}

impl<S> Default for TransferOptions<S> {
    fn default() -> Self {
        Self {
            progress: None,
            on_state: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl<S> Clone for TransferOptions<S> {
    fn clone(&self) -> Self {
        Self {
            progress: self.progress.clone(),
            on_state: self.on_state.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Sequential progress for a byte stream read in order.
pub(crate) struct StreamProgress {
    state: ProgressState,
    callback: Option<ProgressFn>,
}

impl StreamProgress {
    pub(crate) fn new(total: u64, callback: Option<ProgressFn>) -> Self {
        Self {
            state: ProgressState::new(total),
            callback,
        }
    }

    pub(crate) fn advance(&mut self, n: u64) -> u64 {
        let transferred = self.state.advance(n);
        if let Some(cb) = &self.callback {
            cb(self.state.total_bytes, transferred);
        }
        transferred
    }
}

/// Aggregated progress over concurrently transferred parts.
///
/// Each part's counter only moves forward and is clamped to the part size,
/// so the emitted sum is non-decreasing and ends at exactly the total.
pub(crate) struct PartProgress {
    inner: Mutex<PartsInner>,
    callback: Option<ProgressFn>,
}

struct PartsInner {
    part_sizes: Vec<u64>,
    loaded: Vec<u64>,
    state: ProgressState,
}

impl PartProgress {
    pub(crate) fn new(part_sizes: Vec<u64>, callback: Option<ProgressFn>) -> Self {
        let total = part_sizes.iter().sum();
        Self {
            inner: Mutex::new(PartsInner {
                loaded: vec![0; part_sizes.len()],
                part_sizes,
                state: ProgressState::new(total),
            }),
            callback,
        }
    }

    /// Record that `loaded` bytes of part `part` have been sent.
    pub(crate) fn report(&self, part: usize, loaded: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(cap) = inner.part_sizes.get(part).copied() else {
            return;
        };
        let clamped = loaded.min(cap);
        if clamped <= inner.loaded[part] {
            return;
        }
        inner.loaded[part] = clamped;
        let sum = inner.loaded.iter().sum();
        let transferred = inner.state.raise_to(sum);
        // emitted under the lock so observers see totals in order
        if let Some(cb) = &self.callback {
            cb(inner.state.total_bytes, transferred);
        }
    }

    pub(crate) fn complete(&self, part: usize) {
        let size = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.part_sizes.get(part).copied()
        };
        if let Some(size) = size {
            self.report(part, size);
        }
    }

    #[cfg(test)]
    pub(crate) fn transferred(&self) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state.transferred_bytes
    }
}
