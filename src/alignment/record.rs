use crate::data::transformer::AffineTransform;
use serde::{Deserialize, Serialize};
use std::ops::Index;

/// Ordered `(dx, dy)` shifts, one per frame (absolute) or per adjacent pair
/// (relative).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShiftTable {
    shifts: Vec<(f64, f64)>,
}

impl ShiftTable {
    pub fn new(shifts: Vec<(f64, f64)>) -> Self {
        Self { shifts }
    }

    pub fn zeros(len: usize) -> Self {
        Self {
            shifts: vec![(0.0, 0.0); len],
        }
    }

    pub fn len(&self) -> usize {
        self.shifts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty()
    }

    pub fn as_slice(&self) -> &[(f64, f64)] {
        &self.shifts
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, f64)> {
        self.shifts.iter()
    }

    pub fn set(&mut self, index: usize, shift: (f64, f64)) {
        self.shifts[index] = shift;
    }

    /// Largest shift magnitude in the table.
    pub fn max_magnitude(&self) -> f64 {
        self.shifts
            .iter()
            .map(|(dx, dy)| (dx * dx + dy * dy).sqrt())
            .fold(0.0, f64::max)
    }

    /// Translation-only affine transform per entry.
    pub fn to_transforms(&self) -> Vec<AffineTransform> {
        self.shifts
            .iter()
            .map(|&(dx, dy)| AffineTransform::translation(dx, dy))
            .collect()
    }
}

impl Index<usize> for ShiftTable {
    type Output = (f64, f64);

    fn index(&self, index: usize) -> &Self::Output {
        &self.shifts[index]
    }
}

impl From<Vec<(f64, f64)>> for ShiftTable {
    fn from(shifts: Vec<(f64, f64)>) -> Self {
        Self::new(shifts)
    }
}

/// Per-frame geometric correction stored on an aligned stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum FrameCorrection {
    /// Absolute translations, applied with nearest-neighbour sampling.
    Shifts(ShiftTable),
    /// Per-frame affine transforms, applied with bilinear sampling.
    Transforms(Vec<AffineTransform>),
}

impl FrameCorrection {
    pub fn len(&self) -> usize {
        match self {
            FrameCorrection::Shifts(table) => table.len(),
            FrameCorrection::Transforms(transforms) => transforms.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameters of a previously computed correction, replayable on a
/// size-matched stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRecord {
    /// Name of the method that produced the per-frame correction.
    pub method: Option<String>,
    pub pivot: Option<usize>,
    /// `(rows, cols)` of the frames the record was computed on, before any
    /// transpose. Replays require a target of this shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_shape: Option<(usize, usize)>,
    pub correction: Option<FrameCorrection>,
    /// Per-frame vertical shifts applied by center-of-mass tilt alignment
    /// ahead of the rotation, replayed after `correction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory_shifts: Option<ShiftTable>,
    /// Tilt-axis rotation in degrees.
    pub rotation: f64,
    pub x_shift: f64,
    pub y_shift: f64,
    /// Frame axes were swapped after the rotate/translate step.
    pub transposed: bool,
}

impl Default for AlignmentRecord {
    fn default() -> Self {
        Self {
            method: None,
            pivot: None,
            frame_shape: None,
            correction: None,
            trajectory_shifts: None,
            rotation: 0.0,
            x_shift: 0.0,
            y_shift: 0.0,
            transposed: false,
        }
    }
}

impl AlignmentRecord {
    pub fn with_correction(method: &str, pivot: Option<usize>, correction: FrameCorrection) -> Self {
        Self {
            method: Some(method.to_string()),
            pivot,
            correction: Some(correction),
            ..Default::default()
        }
    }

    /// Absolute shift table, when the correction is translation-only.
    pub fn shifts(&self) -> Option<&ShiftTable> {
        match &self.correction {
            Some(FrameCorrection::Shifts(table)) => Some(table),
            _ => None,
        }
    }

    pub fn transforms(&self) -> Option<&[AffineTransform]> {
        match &self.correction {
            Some(FrameCorrection::Transforms(transforms)) => Some(transforms),
            _ => None,
        }
    }

    /// Any geometry has been recorded: a per-frame correction, trajectory
    /// shifts or a tilt-axis correction.
    pub fn is_corrected(&self) -> bool {
        self.correction.is_some() || self.trajectory_shifts.is_some() || self.has_tilt_correction()
    }

    pub fn has_tilt_correction(&self) -> bool {
        self.rotation != 0.0 || self.x_shift != 0.0 || self.y_shift != 0.0 || self.transposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serde_round_trip_keeps_fields_separate() {
        let mut record = AlignmentRecord::with_correction(
            "PC",
            Some(2),
            FrameCorrection::Shifts(ShiftTable::new(vec![(1.0, -2.0), (0.0, 0.0), (-0.5, 3.0)])),
        );
        record.rotation = 1.25;
        record.x_shift = 0.0;
        record.y_shift = -4.0;
        record.transposed = true;
        record.frame_shape = Some((48, 64));

        let json = serde_json::to_string(&record).unwrap();
        let back: AlignmentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.shifts().unwrap()[1], (0.0, 0.0));
        assert!(back.transforms().is_none());
        assert_eq!(back.frame_shape, Some((48, 64)));
        assert!(back.is_corrected());
    }

    #[test]
    fn test_max_magnitude() {
        let table = ShiftTable::new(vec![(3.0, 4.0), (0.0, -1.0)]);
        assert!((table.max_magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_record_has_no_tilt_correction() {
        assert!(!AlignmentRecord::default().has_tilt_correction());
    }
}
