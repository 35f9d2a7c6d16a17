use approx::assert_relative_eq;

use picketfence::synthetic::SyntheticFence;
use picketfence::{
    AnalysisConfig, Classification, CombineMode, EpidImage, MlcArrangement, MlcPreset,
    Orientation, PicketFence, PicketFenceError, PicketReference, PixelSpacing,
};

fn analyze(fence: &SyntheticFence) -> picketfence::PfResult {
    PicketFence::default()
        .analyze(&[fence.to_epid().unwrap()])
        .unwrap()
}

#[test]
fn perfect_fence_passes_with_negligible_error() {
    let fence = SyntheticFence::evenly_spaced(10, 15.0).with_size(800, 560);
    let result = analyze(&fence);

    assert_eq!(result.pickets.len(), 10);
    assert_eq!(result.percent_passing(), 100.0);
    assert!(result.passed());
    assert!(result.max_error.error_mm < 0.05, "{:?}", result.max_error);
    assert!(result.median_error_mm < 0.05);
    assert_eq!(result.orientation, Orientation::Vertical);
    assert!(result.dropped_pickets.is_empty());
    assert_relative_eq!(result.mean_picket_spacing_mm().unwrap(), 15.0, epsilon = 0.02);

    let text = result.text_summary();
    assert!(text.contains("100.0% Passed"), "{text}");
    assert!(text.contains("Median Error:"));
    assert!(text.contains("Max Error:"));
}

#[test]
fn tilted_picket_is_fully_explained_by_the_fit() {
    let tilt = 0.02;
    let fence = SyntheticFence::new(vec![5.0]).with_tilt(tilt);
    let result = analyze(&fence);

    assert_eq!(result.pickets.len(), 1);
    let picket = &result.pickets[0];
    let PicketReference::Fitted(fit) = &picket.reference else {
        panic!("expected a fitted picket");
    };
    assert_relative_eq!(fit.slope(), tilt, epsilon = 1e-3);
    assert_relative_eq!(picket.offset_from_cax_mm(), 5.0, epsilon = 0.02);
    for v in &picket.values {
        assert!(v.error_mm.abs() < 0.02, "{v:?}");
        assert_eq!(v.classification, Classification::Pass);
    }
    assert_relative_eq!(result.mlc_skew_deg(), tilt.atan().to_degrees(), epsilon = 0.05);
}

#[test]
fn superimposed_frames_merge_disjoint_leaf_sets() {
    let even: Vec<usize> = (10..50).filter(|l| l % 2 == 0).collect();
    let odd: Vec<usize> = (10..50).filter(|l| l % 2 == 1).collect();
    let a = SyntheticFence::evenly_spaced(5, 25.0).with_leaves(even);
    let b = SyntheticFence::evenly_spaced(5, 25.0).with_leaves(odd);

    for mode in [CombineMode::Max, CombineMode::Sum] {
        let mut pf = PicketFence::default();
        pf.config_mut().condition.combine = mode;
        let result = pf
            .analyze(&[a.to_epid().unwrap(), b.to_epid().unwrap()])
            .unwrap();
        assert_eq!(result.pickets.len(), 5);
        for picket in &result.pickets {
            let leaves: Vec<usize> = picket.values.iter().map(|v| v.leaf_index).collect();
            assert_eq!(leaves, (10..50).collect::<Vec<_>>(), "{mode:?}");
        }
        assert_eq!(result.n_measured_leaf_pairs, 40);
        assert!(result.passed());
    }
}

#[test]
fn swapped_axes_give_horizontal_orientation_and_same_measurements() {
    let vertical = SyntheticFence::evenly_spaced(6, 20.0)
        .with_size(600, 500)
        .with_leaf_error(2, 30, 0.3);
    let horizontal = vertical
        .clone()
        .with_size(500, 600)
        .with_orientation(Orientation::Horizontal);

    let v = analyze(&vertical);
    let h = analyze(&horizontal);
    assert_eq!(v.orientation, Orientation::Vertical);
    assert_eq!(h.orientation, Orientation::Horizontal);
    assert_eq!(v.pickets.len(), h.pickets.len());
    assert_eq!(v.max_error.leaf_index, 30);
    assert_eq!(h.max_error.leaf_index, 30);
    assert_eq!(v.max_error.picket_index, 2);
    assert_relative_eq!(v.max_error.error_mm, h.max_error.error_mm, epsilon = 1e-4);
}

#[test]
fn leaf_errors_are_classified_against_tolerances() {
    let fence = SyntheticFence::evenly_spaced(5, 25.0)
        .with_leaf_error(1, 20, 0.9)
        .with_leaf_error(3, 40, -0.4);
    let mut pf = PicketFence::default();
    pf.config_mut().tolerance_mm = 0.5;
    pf.config_mut().action_tolerance_mm = Some(0.25);
    let result = pf.analyze(&[fence.to_epid().unwrap()]).unwrap();

    assert!(!result.passed());
    assert_eq!(result.failed_leaves(), vec![20]);
    assert_eq!(result.max_error.picket_index, 1);
    assert_eq!(result.max_error.leaf_index, 20);
    // The fit absorbs a small share of the outlier.
    assert!((0.8..0.9).contains(&result.max_error.error_mm), "{:?}", result.max_error);

    let p3 = &result.pickets[3];
    let leaf40 = p3.values.iter().find(|v| v.leaf_index == 40).unwrap();
    assert_eq!(leaf40.classification, Classification::Action);
    assert!(leaf40.error_mm < 0.0);

    let n = result.values().count();
    assert_relative_eq!(result.pass_fraction, (n - 1) as f64 / n as f64, epsilon = 1e-12);
}

#[test]
fn bright_field_noisy_acquisition_is_conditioned_and_passes() {
    let fence = SyntheticFence::evenly_spaced(8, 18.0)
        .bright_field()
        .with_noise(10.0, 42)
        .with_hot_pixels(40, 7);
    let result = analyze(&fence);
    assert!(result.conditioning.inverted);
    assert_eq!(result.conditioning.filter_size, Some(3));
    assert_eq!(result.pickets.len(), 8);
    assert!(result.passed());
    assert!(result.max_error.error_mm < 0.15, "{:?}", result.max_error);
}

#[test]
fn absolute_mode_measures_against_expected_positions() {
    let fence = SyntheticFence::new(vec![-30.0, 0.0, 30.0]).with_tilt(0.005);
    let pf = PicketFence::default();
    let result = pf
        .analyze_with_expected(&[fence.to_epid().unwrap()], &[-30.0, 0.0, 30.3])
        .unwrap();

    assert!(result.is_absolute());
    assert_eq!(result.mlc_skew_deg(), 0.0);
    for (picket, offset) in result.pickets.iter().zip([0.0, 0.0, -0.3]) {
        for v in &picket.values {
            // Tilt is not fitted away in absolute mode.
            let expected = offset + 0.005 * v.lateral_position_mm;
            assert!((v.error_mm - expected).abs() < 0.02, "{v:?}");
        }
    }
}

#[test]
fn sag_adjustment_shifts_expected_positions() {
    let fence = SyntheticFence::new(vec![-19.0, 21.0]);
    let mut pf = PicketFence::default();
    pf.config_mut().sag_adjustment_mm = 1.0;
    let result = pf
        .analyze_with_expected(&[fence.to_epid().unwrap()], &[-20.0, 20.0])
        .unwrap();
    assert!(result.passed());
    assert!(result.max_error.error_mm < 0.05);
    assert_eq!(result.picket_offsets_from_cax_mm(), vec![-19.0, 21.0]);
}

#[test]
fn expected_count_mismatch_is_a_detection_error() {
    let fence = SyntheticFence::evenly_spaced(3, 30.0);
    let mut pf = PicketFence::default();
    pf.config_mut().num_pickets = Some(4);
    let err = pf
        .analyze_with_expected(&[fence.to_epid().unwrap()], &[-30.0, 0.0, 30.0])
        .unwrap_err();
    assert!(matches!(err, PicketFenceError::PicketDetection(_)));

    let err = pf.analyze(&[fence.to_epid().unwrap()]).unwrap_err();
    assert!(matches!(err, PicketFenceError::PicketDetection(_)));
}

#[test]
fn unirradiated_picket_position_is_dropped_with_a_record() {
    // The third expected position has no stripe at all.
    let fence = SyntheticFence::new(vec![-30.0, 0.0]);
    let result = PicketFence::default()
        .analyze_with_expected(&[fence.to_epid().unwrap()], &[-30.0, 0.0, 45.0])
        .unwrap();
    assert_eq!(result.pickets.len(), 2);
    assert_eq!(result.dropped_pickets.len(), 1);
    assert_eq!(result.dropped_pickets[0].n_samples, 0);
    assert_eq!(result.dropped_pickets[0].center_mm, 45.0);
}

#[test]
fn no_stripes_at_all_is_a_detection_error() {
    let epid =
        EpidImage::from_vec(64, 48, vec![500.0; 64 * 48], PixelSpacing::isotropic(0.4)).unwrap();
    let err = PicketFence::default().analyze(&[epid]).unwrap_err();
    assert!(matches!(err, PicketFenceError::PicketDetection(_)));
}

#[test]
fn hd_millennium_fence_resolves_narrow_leaves() {
    let fence = SyntheticFence::evenly_spaced(5, 20.0)
        .with_mlc(MlcArrangement::preset(MlcPreset::HdMillennium))
        .with_spacing(PixelSpacing::isotropic(0.25))
        .with_size(800, 600)
        .with_leaf_error(2, 30, 0.35);
    let mut pf = PicketFence::new(MlcArrangement::preset(MlcPreset::HdMillennium));
    pf.config_mut().tolerance_mm = 0.3;
    let result = pf.analyze(&[fence.to_epid().unwrap()]).unwrap();

    // ±74.9 mm lateral field: all 32 central 2.5 mm leaves plus the seven
    // innermost 5 mm leaves on each side.
    assert_eq!(result.n_measured_leaf_pairs, 46);
    assert_eq!(result.failed_leaves(), vec![30]);
}

#[test]
fn results_serialize_to_json() {
    let result = analyze(&SyntheticFence::evenly_spaced(3, 30.0));
    let text = serde_json::to_string(&result).unwrap();
    let back: picketfence::PfResult = serde_json::from_str(&text).unwrap();
    assert_eq!(back.pickets.len(), 3);
    assert_eq!(back.max_error.leaf_index, result.max_error.leaf_index);
    assert_relative_eq!(back.max_error.error_mm, result.max_error.error_mm, epsilon = 1e-12);

    let kv = result.to_key_values();
    assert_eq!(kv["n_pickets"], serde_json::json!(3));
    assert_eq!(kv["passed"], serde_json::json!(true));
}

#[test]
fn config_file_drives_the_analysis() {
    let dir = std::env::temp_dir().join(format!("picketfence-cfg-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("config.json");
    std::fs::write(
        &path,
        r#"{ "mlc": "millennium", "tolerance_mm": 0.2, "num_pickets": 4, "sampler": { "parallel": false } }"#,
    )
    .unwrap();

    let pf = PicketFence::from_config_file(&path).unwrap();
    assert_eq!(pf.config().num_pickets, Some(4));
    let fence = SyntheticFence::evenly_spaced(4, 30.0).with_leaf_error(0, 25, 0.25);
    let result = pf.analyze(&[fence.to_epid().unwrap()]).unwrap();
    assert_eq!(result.tolerance_mm, 0.2);
    assert_eq!(result.failed_leaves(), vec![25]);

    let bad = dir.join("bad.json");
    std::fs::write(&bad, r#"{ "tolerance_mm": 0.2, "action_tolerance_mm": 0.3 }"#).unwrap();
    let err = AnalysisConfig::from_json_file(&bad).unwrap_err();
    assert!(matches!(err, PicketFenceError::Configuration(_)));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn partially_irradiated_bank_keeps_picket_orientation() {
    for n in [2, 5] {
        let vertical = SyntheticFence::evenly_spaced(n, 30.0).with_leaves((20..40).collect());
        let horizontal = vertical
            .clone()
            .with_size(500, 600)
            .with_orientation(Orientation::Horizontal);
        for (fence, orientation) in [
            (vertical, Orientation::Vertical),
            (horizontal, Orientation::Horizontal),
        ] {
            let result = analyze(&fence);
            assert_eq!(result.orientation, orientation, "n={n}");
            assert_eq!(result.pickets.len(), n);
            assert!(result.dropped_pickets.is_empty());
            assert_eq!(result.n_measured_leaf_pairs, 20);
            assert!(result.passed());
            assert!(result.max_error.error_mm < 0.05, "{:?}", result.max_error);
        }
    }
}

#[test]
fn pickets_near_the_frame_edge_keep_a_dark_field_image_upright() {
    let positions = vec![-110.0, -60.0, 0.0, 60.0, 110.0];
    let result = analyze(&SyntheticFence::new(positions.clone()));
    assert!(!result.conditioning.inverted);
    assert_eq!(result.pickets.len(), 5);
    assert!(result.dropped_pickets.is_empty());
    for (offset, truth) in result.picket_offsets_from_cax_mm().iter().zip(&positions) {
        assert!((offset - truth).abs() < 0.05, "{offset} vs {truth}");
    }

    let bright = analyze(&SyntheticFence::new(positions).bright_field());
    assert!(bright.conditioning.inverted);
    assert_eq!(bright.pickets.len(), 5);
}

#[test]
fn anisotropic_pixels_are_scaled_per_axis() {
    let vertical = SyntheticFence::evenly_spaced(5, 25.0)
        .with_spacing(PixelSpacing::new(0.3, 0.45))
        .with_leaf_error(2, 30, 0.4);
    let horizontal = vertical
        .clone()
        .with_size(500, 600)
        .with_spacing(PixelSpacing::new(0.45, 0.3))
        .with_orientation(Orientation::Horizontal);

    for (fence, orientation) in [
        (vertical, Orientation::Vertical),
        (horizontal, Orientation::Horizontal),
    ] {
        let result = analyze(&fence);
        assert_eq!(result.orientation, orientation);
        assert_eq!(result.pickets.len(), 5);
        assert_relative_eq!(result.mean_picket_spacing_mm().unwrap(), 25.0, epsilon = 0.02);
        assert_eq!(result.max_error.picket_index, 2);
        assert_eq!(result.max_error.leaf_index, 30);
        assert!((0.3..0.45).contains(&result.max_error.error_mm), "{:?}", result.max_error);
    }
}

#[test]
fn oversized_crop_is_an_image_load_error() {
    let mut pf = PicketFence::default();
    pf.config_mut().condition.crop_mm = 1e10;
    let err = pf
        .analyze(&[SyntheticFence::evenly_spaced(3, 30.0).to_epid().unwrap()])
        .unwrap_err();
    assert!(matches!(err, PicketFenceError::ImageLoad(_)));
}
