use crate::alignment::record::ShiftTable;
use crate::error::AlignError;
use crate::Result;

/// Turn N-1 relative shifts into N absolute shifts anchored at `pivot`.
///
/// `relative[i]` is the displacement of frame `i + 1` with respect to frame
/// `i`. The pivot gets `(0, 0)`; frames after it subtract the accumulated
/// displacement, frames before it add it, so error grows with the distance
/// from the pivot instead of across the whole stack.
pub fn compose_shifts(relative: &ShiftTable, pivot: usize) -> Result<ShiftTable> {
    let n = relative.len() + 1;
    if pivot >= n {
        return Err(AlignError::invalid(format!(
            "pivot {} outside [0, {})",
            pivot, n
        )));
    }

    let mut absolute = ShiftTable::zeros(n);
    for i in pivot + 1..n {
        let (px, py) = absolute[i - 1];
        let (rx, ry) = relative[i - 1];
        absolute.set(i, (px - rx, py - ry));
    }
    for i in (0..pivot).rev() {
        let (nx, ny) = absolute[i + 1];
        let (rx, ry) = relative[i];
        absolute.set(i, (nx + rx, ny + ry));
    }

    tracing::debug!(
        target: "tomo_align::composer",
        frames = n,
        pivot = pivot,
        max_shift = absolute.max_magnitude(),
        "Composed absolute shifts"
    );
    Ok(absolute)
}
