//! Structured spans for hierarchical logging
//!
//! Estimator runs and orchestrator stages get their own spans, tagged with
//! the thread's correlation id when one is set.

use instant::Instant;
use tracing::{field, span, Level, Span};

/// Span around one shift-estimation run over a stack.
pub struct AlgorithmSpan {
    span: Span,
    start_time: Instant,
    pairs_recorded: std::cell::Cell<usize>,
}

impl AlgorithmSpan {
    pub fn new(algorithm_name: &str, frames: usize, pivot: usize) -> Self {
        let span = match crate::logging::get_correlation_id() {
            Some(corr_id) => span!(
                target: "tomo_align::estimator",
                Level::INFO,
                "shift_estimation",
                algorithm = algorithm_name,
                frames = frames,
                pivot = pivot,
                max_shift = field::Empty,
                execution_time_ms = field::Empty,
                correlation_id = %corr_id
            ),
            None => span!(
                target: "tomo_align::estimator",
                Level::INFO,
                "shift_estimation",
                algorithm = algorithm_name,
                frames = frames,
                pivot = pivot,
                max_shift = field::Empty,
                execution_time_ms = field::Empty
            ),
        };

        Self {
            span,
            start_time: Instant::now(),
            pairs_recorded: std::cell::Cell::new(0),
        }
    }

    /// Record the relative shift estimated for pair `index -> index + 1`.
    pub fn record_pair(&self, index: usize, shift: (f64, f64)) {
        self.pairs_recorded.set(self.pairs_recorded.get() + 1);
        tracing::debug!(
            target: "tomo_align::estimator",
            parent: &self.span,
            pair = index,
            dx = shift.0,
            dy = shift.1,
            "Pair shift estimated"
        );
    }

    pub fn record_result(&self, max_shift: f64) {
        let duration = self.start_time.elapsed();
        self.span.record("max_shift", max_shift);
        self.span.record("execution_time_ms", duration.as_millis() as u64);

        tracing::info!(
            target: "tomo_align::estimator",
            parent: &self.span,
            pairs = self.pairs_recorded.get(),
            max_shift = format!("{:.2}px", max_shift),
            execution_time_ms = duration.as_millis() as u64,
            "Shift estimation completed"
        );
    }

    pub fn pairs_recorded(&self) -> usize {
        self.pairs_recorded.get()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span for one orchestrator or tilt-estimation stage.
pub struct StageSpan {
    span: Span,
    start_time: Instant,
}

impl StageSpan {
    pub fn new(stage_name: &str) -> Self {
        let span = match crate::logging::get_correlation_id() {
            Some(corr_id) => span!(
                target: "tomo_align::orchestrator",
                Level::INFO,
                "alignment_stage",
                stage = stage_name,
                success = field::Empty,
                execution_time_ms = field::Empty,
                correlation_id = %corr_id
            ),
            None => span!(
                target: "tomo_align::orchestrator",
                Level::INFO,
                "alignment_stage",
                stage = stage_name,
                success = field::Empty,
                execution_time_ms = field::Empty
            ),
        };

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    /// Record stage completion and return its wall time in milliseconds.
    pub fn record_completion(&self, success: bool) -> f64 {
        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        self.span.record("success", success);
        self.span.record("execution_time_ms", elapsed_ms);

        tracing::info!(
            target: "tomo_align::orchestrator",
            parent: &self.span,
            success = success,
            execution_time_ms = format!("{:.1}", elapsed_ms),
            "Alignment stage completed"
        );
        elapsed_ms
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn test_algorithm_span() {
        let span = AlgorithmSpan::new("PhaseCorrelation", 5, 2);
        let _enter = span.enter();
        span.record_pair(2, (1.5, -0.5));
        span.record_pair(1, (0.0, 2.0));
        span.record_result(2.0);
        assert_eq!(span.pairs_recorded(), 2);
        assert!(logs_contain("Shift estimation completed"));
    }

    #[traced_test]
    #[test]
    fn test_stage_span_with_correlation_id() {
        let id = crate::logging::new_correlation_id();
        let span = StageSpan::new("compose");
        let _enter = span.enter();
        let elapsed = span.record_completion(true);
        assert!(elapsed >= 0.0);
        assert!(logs_contain(&id.to_string()));
        crate::logging::clear_correlation_id();
    }
}
