//! Turning shift estimates into a replayable per-frame correction.

pub mod apply;
pub mod compose;
pub mod orchestrator;
pub mod progress;
pub mod record;

pub use apply::{
    apply_correction, apply_record, apply_shifts, apply_tilt_correction, apply_to_other, apply_trajectory_shifts,
    apply_transforms,
};
pub use compose::compose_shifts;
pub use orchestrator::{align_stack, register_frame_series, AlignOptions, AlignmentOrchestrator, AlignmentReport};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use record::{AlignmentRecord, FrameCorrection, ShiftTable};
