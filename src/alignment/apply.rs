use crate::alignment::record::{AlignmentRecord, FrameCorrection, ShiftTable};
use crate::data::stack::ImageStack;
use crate::data::transformer::{AffineTransform, ImageTransformer};
use crate::error::AlignError;
use crate::Result;
use tracing::info;

/// Translate each frame by its absolute shift (nearest neighbour, zero fill).
///
/// The input must not carry any recorded correction yet.
///
/// Zero-order sampling keeps pixel values unblended so sinograms re-derived
/// from the aligned stack stay faithful to the measured intensities.
pub fn apply_shifts(stack: &ImageStack, shifts: &ShiftTable) -> Result<ImageStack> {
    check_uncorrected(stack)?;
    check_length(stack, shifts.len())?;
    let mut shifted = stack.map_frames(|i, frame| {
        let (dx, dy) = shifts[i];
        ImageTransformer::translate_nearest(frame, dx, dy)
    })?;
    record_correction(&mut shifted, FrameCorrection::Shifts(shifts.clone()));
    Ok(shifted)
}

/// Warp each frame by its affine transform (bilinear, zero border).
pub fn apply_transforms(stack: &ImageStack, transforms: &[AffineTransform]) -> Result<ImageStack> {
    check_uncorrected(stack)?;
    check_length(stack, transforms.len())?;
    let mut warped = stack.try_map_frames(|i, frame| ImageTransformer::warp_affine(frame, &transforms[i]))?;
    record_correction(&mut warped, FrameCorrection::Transforms(transforms.to_vec()));
    Ok(warped)
}

pub fn apply_correction(stack: &ImageStack, correction: &FrameCorrection) -> Result<ImageStack> {
    match correction {
        FrameCorrection::Shifts(shifts) => apply_shifts(stack, shifts),
        FrameCorrection::Transforms(transforms) => apply_transforms(stack, transforms),
    }
}

/// Shift frames onto a fitted centroid trajectory ahead of a tilt
/// correction, keeping any earlier per-frame correction on the record.
pub fn apply_trajectory_shifts(stack: &ImageStack, shifts: &ShiftTable) -> Result<ImageStack> {
    check_length(stack, shifts.len())?;
    if stack
        .alignment()
        .is_some_and(|r| r.has_tilt_correction() || r.trajectory_shifts.is_some())
    {
        return Err(AlignError::invalid(
            "trajectory shifts must precede the stack's single tilt-axis correction",
        ));
    }
    let mut shifted = stack.map_frames(|i, frame| {
        let (dx, dy) = shifts[i];
        ImageTransformer::translate_nearest(frame, dx, dy)
    })?;
    let mut record = shifted.take_alignment().unwrap_or_default();
    record.frame_shape.get_or_insert(stack.frame_shape());
    record.trajectory_shifts = Some(shifts.clone());
    shifted.set_alignment(record);
    Ok(shifted)
}

/// Rotate + translate every frame and optionally transpose the frame axes,
/// recording the parameters on the output.
///
/// A stack can carry a single tilt correction; applying a second one would
/// make the record unreplayable, so that is rejected.
pub fn apply_tilt_correction(
    stack: &ImageStack,
    rotation: f64,
    x_shift: f64,
    y_shift: f64,
    transpose: bool,
) -> Result<ImageStack> {
    if stack.alignment().is_some_and(|r| r.has_tilt_correction()) {
        return Err(AlignError::invalid(
            "stack already carries a tilt-axis correction",
        ));
    }

    let mut out = tilt_transform(stack, rotation, x_shift, y_shift, transpose)?;
    let mut record = stack.alignment().cloned().unwrap_or_default();
    record.frame_shape.get_or_insert(stack.frame_shape());
    record.rotation = rotation;
    record.x_shift = x_shift;
    record.y_shift = y_shift;
    record.transposed = transpose;
    out.set_alignment(record);

    info!(
        target: "tomo_align::tilt",
        rotation = rotation,
        x_shift = x_shift,
        y_shift = y_shift,
        transposed = transpose,
        "Tilt-axis correction applied"
    );
    Ok(out)
}

/// Replay the reference stack's alignment onto `target`.
///
/// `target` must have the reference's frame count and the shape the
/// reference had before any recorded transpose, i.e. the shape of the raw
/// acquisition the record was computed on.
pub fn apply_to_other(reference: &ImageStack, target: &ImageStack) -> Result<ImageStack> {
    let record = reference.alignment().ok_or(AlignError::MissingAlignment)?;

    let expected_shape = record.frame_shape.unwrap_or_else(|| {
        let (rows, cols) = reference.frame_shape();
        if record.transposed {
            (cols, rows)
        } else {
            (rows, cols)
        }
    });
    if target.frame_count() != reference.frame_count() {
        return Err(AlignError::mismatch(
            "frame count",
            reference.frame_count(),
            target.frame_count(),
        ));
    }
    if target.frame_shape() != expected_shape {
        return Err(AlignError::mismatch("frame shape", expected_shape, target.frame_shape()));
    }
    apply_record(record, target)
}

/// Replay a stored record onto `target`: per-frame correction, trajectory
/// shifts, then the tilt correction.
///
/// `target` must be uncorrected and, when the record knows it, match the
/// recorded frame shape.
pub fn apply_record(record: &AlignmentRecord, target: &ImageStack) -> Result<ImageStack> {
    check_uncorrected(target)?;
    if let Some(shape) = record.frame_shape {
        if target.frame_shape() != shape {
            return Err(AlignError::mismatch("frame shape", shape, target.frame_shape()));
        }
    }
    let mut out = match &record.correction {
        Some(correction) => apply_correction(target, correction)?,
        None => target.clone(),
    };
    if let Some(shifts) = &record.trajectory_shifts {
        check_length(&out, shifts.len())?;
        out = out.map_frames(|i, frame| {
            let (dx, dy) = shifts[i];
            ImageTransformer::translate_nearest(frame, dx, dy)
        })?;
    }
    if record.has_tilt_correction() {
        out = tilt_transform(&out, record.rotation, record.x_shift, record.y_shift, record.transposed)?;
    }
    out.set_alignment(record.clone());

    info!(
        target: "tomo_align::orchestrator",
        x_shift = format!("{:.1}", record.x_shift),
        y_shift = format!("{:.1}", record.y_shift),
        rotation = format!("{:.1}", record.rotation),
        "Stack alignment applied to other stack"
    );
    Ok(out)
}

/// Geometry of a tilt correction without touching the record.
pub(crate) fn tilt_transform(
    stack: &ImageStack,
    rotation: f64,
    x_shift: f64,
    y_shift: f64,
    transpose: bool,
) -> Result<ImageStack> {
    let mut out = if rotation != 0.0 || x_shift != 0.0 || y_shift != 0.0 {
        stack.rotate_translate(x_shift, y_shift, rotation)?
    } else {
        stack.clone()
    };
    if transpose {
        out.transpose_frame_axes();
    }
    Ok(out)
}

fn check_length(stack: &ImageStack, len: usize) -> Result<()> {
    if len != stack.frame_count() {
        return Err(AlignError::mismatch("per-frame correction length", stack.frame_count(), len));
    }
    Ok(())
}

/// A record holds one correction per stage, replayed in a fixed order, so a
/// second per-frame correction cannot be stacked on top of an earlier one.
pub(crate) fn check_uncorrected(stack: &ImageStack) -> Result<()> {
    if stack.alignment().is_some_and(|r| r.is_corrected()) {
        return Err(AlignError::invalid(
            "stack already carries a recorded correction; align the uncorrected stack instead",
        ));
    }
    Ok(())
}

fn record_correction(stack: &mut ImageStack, correction: FrameCorrection) {
    let mut record: AlignmentRecord = stack.take_alignment().unwrap_or_default();
    record.frame_shape.get_or_insert(stack.frame_shape());
    record.correction = Some(correction);
    stack.set_alignment(record);
}
