use tomo_align::alignment::{
    apply_shifts, apply_tilt_correction, apply_to_other, compose_shifts, AlignmentOrchestrator, ProgressReporter,
};
use tomo_align::data::synthetic::{add_gaussian_noise, blob_image, tilt_range, translated_series, RodPhantom};
use tomo_align::algorithms::CenterOfMassConfig;
use tomo_align::alignment::AlignOptions;
use tomo_align::*;

const ANGLES: [f64; 5] = [-20.0, -10.0, 0.0, 10.0, 20.0];
const SHIFTS: [(f64, f64); 5] = [(4.0, -3.0), (-2.0, 1.0), (0.0, 0.0), (3.0, 2.0), (-5.0, -1.0)];

fn shifted_stack(seed: u64) -> (ndarray::Array2<f32>, ImageStack) {
    let base = blob_image(64, 64, 8, seed);
    let stack = translated_series(&base, &SHIFTS, Some(ANGLES.to_vec())).unwrap();
    (base, stack)
}

fn assert_matches_base(aligned: &ImageStack, base: &ndarray::Array2<f32>, tolerance: f32) {
    // the border can hold zero fill from the shifts
    for i in 0..aligned.frame_count() {
        let frame = aligned.frame(i);
        for y in 8..56 {
            for x in 8..56 {
                let diff = (frame[[y, x]] - base[[y, x]]).abs();
                assert!(diff <= tolerance, "frame {} pixel ({}, {}) differs by {}", i, x, y, diff);
            }
        }
    }
}

#[test]
fn test_phase_correlation_end_to_end() {
    let (base, stack) = shifted_stack(3);
    assert_eq!(stack.default_pivot(), 2);

    let aligned = align_stack(&stack, ShiftMethod::PhaseCorrelation).unwrap();
    let record = aligned.alignment().unwrap();
    let table = record.shifts().unwrap();
    assert_eq!(table[2], (0.0, 0.0));
    for (i, &(dx, dy)) in SHIFTS.iter().enumerate() {
        assert!((table[i].0 + dx).abs() < 0.5 && (table[i].1 + dy).abs() < 0.5, "frame {}: {:?}", i, table[i]);
    }
    assert_matches_base(&aligned, &base, 1e-6);
}

#[test]
fn test_pairwise_methods_recover_translations() {
    let small: [(f64, f64); 5] = [(1.0, -1.0), (-1.0, 0.0), (0.0, 0.0), (1.0, 1.0), (-1.0, -1.0)];
    let base = blob_image(64, 64, 8, 5);
    let stack = translated_series(&base, &small, Some(ANGLES.to_vec())).unwrap();
    for method in [ShiftMethod::Ecc, ShiftMethod::StackReg] {
        let (aligned, report) = AlignmentOrchestrator::default()
            .align(&stack, method, &mut ProgressReporter::silent())
            .unwrap();
        assert_eq!(report.pivot, Some(2));
        let transforms = aligned.alignment().unwrap().transforms().unwrap().to_vec();
        for (i, &(dx, dy)) in small.iter().enumerate() {
            let (tx, ty) = transforms[i].translation_part();
            assert!((tx + dx).abs() < 0.25 && (ty + dy).abs() < 0.25, "{} frame {}: ({}, {})", method, i, tx, ty);
        }
        assert_matches_base(&aligned, &base, 0.1);
    }
}

#[test]
fn test_noisy_series_still_aligns() {
    let (_, stack) = shifted_stack(9);
    let noisy = add_gaussian_noise(&stack, 0.02, 1).unwrap();
    let aligned = align_stack(&noisy, ShiftMethod::PhaseCorrelation).unwrap();
    let table = aligned.alignment().unwrap().shifts().unwrap().clone();
    for (i, &(dx, dy)) in SHIFTS.iter().enumerate() {
        assert!((table[i].0 + dx).abs() < 0.5 && (table[i].1 + dy).abs() < 0.5);
    }
}

#[test]
fn test_composition_invariant_on_estimated_shifts() {
    let (_, stack) = shifted_stack(4);
    let relative = algorithms::estimate_relative_shifts(
        &stack,
        &algorithms::PhaseCorrelation::new(),
        1,
        &mut ProgressReporter::silent(),
    )
    .unwrap();
    let absolute = compose_shifts(&relative, 1).unwrap();
    assert_eq!(absolute[1], (0.0, 0.0));
    for i in 0..relative.len() {
        assert!((absolute[i].0 - absolute[i + 1].0 - relative[i].0).abs() < 1e-12);
        assert!((absolute[i].1 - absolute[i + 1].1 - relative[i].1).abs() < 1e-12);
    }
}

#[test]
fn test_degenerate_frame_aborts_estimate() {
    let (_, stack) = shifted_stack(2);
    let mut broken = stack.clone();
    broken.set_frame(3, ndarray::Array2::zeros((64, 64)).view()).unwrap();
    let result = align_stack(&broken, ShiftMethod::PhaseCorrelation);
    assert!(matches!(result, Err(AlignError::EstimationFailure(_))));
}

#[test]
fn test_center_of_mass_shifts_flatten_jitter() {
    let angles = tilt_range(-60.0, 60.0, 13);
    let clean = RodPhantom::default().project((64, 48), &angles, 0.0, 0.0).unwrap();
    let jitter: Vec<(f64, f64)> = (0..13).map(|i| (0.0, [2.0, -1.0, 3.0, 0.0, -2.0][i % 5])).collect();
    let jittered = apply_shifts(&clean, &ShiftTable::new(jitter.clone())).unwrap();
    let jittered = ImageStack::new(jittered.data().clone(), Some(angles)).unwrap();

    let options = AlignOptions {
        center_of_mass: CenterOfMassConfig {
            slice: Some(20),
            band_width: 8,
            ratio: 0.5,
        },
        ..Default::default()
    };
    let (aligned, report) = AlignmentOrchestrator::new(options)
        .align(&jittered, ShiftMethod::CenterOfMass, &mut ProgressReporter::silent())
        .unwrap();
    assert_eq!(report.pivot, None);
    let record = aligned.alignment().unwrap();
    assert_eq!(record.method.as_deref(), Some("COM"));
    let table = record.shifts().unwrap();
    // the jitter is undone up to a shared sinusoidal component
    for i in 0..13 {
        assert_eq!(table[i].0, 0.0);
    }
    let residual: Vec<f64> = (0..13).map(|i| table[i].1 + jitter[i].1).collect();
    let mean = residual.iter().sum::<f64>() / 13.0;
    assert!(residual.iter().all(|r| (r - mean).abs() < 0.5), "{:?}", residual);
}

#[test]
fn test_replay_on_second_channel() {
    let (_, stack) = shifted_stack(6);
    let aligned = align_stack(&stack, ShiftMethod::PhaseCorrelation).unwrap();
    let leveled = apply_tilt_correction(&aligned, 1.5, 0.0, -2.0, true).unwrap();

    let second = ImageStack::new(stack.data().mapv(|v| v * 2.0), Some(ANGLES.to_vec())).unwrap();
    let replayed = apply_to_other(&leveled, &second).unwrap();
    assert_eq!(replayed.frame_shape(), leveled.frame_shape());
    for (a, b) in replayed.data().iter().zip(leveled.data().iter()) {
        assert!((a - 2.0 * b).abs() < 1e-5);
    }
    assert_eq!(replayed.alignment(), leveled.alignment());

    let wrong = ImageStack::new(ndarray::Array3::zeros((5, 64, 60)), None).unwrap();
    assert!(matches!(apply_to_other(&leveled, &wrong), Err(AlignError::DimensionMismatch { .. })));
    assert!(matches!(apply_to_other(&stack, &second), Err(AlignError::MissingAlignment)));
}

#[test]
fn test_wrong_length_table() {
    let (_, stack) = shifted_stack(1);
    let result = apply_shifts(&stack, &ShiftTable::zeros(4));
    assert!(matches!(result, Err(AlignError::DimensionMismatch { .. })));
}

#[test]
fn test_chained_corrections_keep_record_replayable() {
    let (_, stack) = shifted_stack(9);
    let aligned = align_stack(&stack, ShiftMethod::PhaseCorrelation).unwrap();

    // shifting an aligned stack again would leave the record describing only one of them
    let nudge = ShiftTable::new(vec![(1.0, 0.0); 5]);
    assert!(matches!(apply_shifts(&aligned, &nudge), Err(AlignError::InvalidParameter(_))));

    let leveled = apply_tilt_correction(&aligned, 2.0, 0.0, 3.0, true).unwrap();
    assert!(matches!(
        align_stack(&leveled, ShiftMethod::PhaseCorrelation),
        Err(AlignError::InvalidParameter(_))
    ));

    // shifts then tilt is the recorded order and replays onto the raw stack
    let replayed = apply_to_other(&leveled, &stack).unwrap();
    let worst = replayed
        .data()
        .iter()
        .zip(leveled.data().iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    assert!(worst < 1e-5, "replay differs by {}", worst);
    assert_eq!(leveled.alignment().unwrap().frame_shape, Some((64, 64)));
}
