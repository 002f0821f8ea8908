/// One progress notification from a long-running estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub stage: &'static str,
    pub completed: usize,
    pub total: usize,
}

/// Optional progress sink threaded through estimators.
///
/// Reporting is observational only: callbacks cannot stop or steer the
/// computation.
#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<Box<dyn FnMut(&ProgressUpdate) + 'a>>,
    reported: usize,
}

impl<'a> ProgressReporter<'a> {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(&ProgressUpdate) + 'a,
    {
        Self {
            callback: Some(Box::new(callback)),
            reported: 0,
        }
    }

    /// Reporter that only counts updates.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn report(&mut self, stage: &'static str, completed: usize, total: usize) {
        self.reported += 1;
        tracing::trace!(stage = stage, completed = completed, total = total, "progress");
        if let Some(callback) = self.callback.as_mut() {
            callback(&ProgressUpdate {
                stage,
                completed,
                total,
            });
        }
    }

    /// Number of updates emitted so far.
    pub fn reported(&self) -> usize {
        self.reported
    }
}
