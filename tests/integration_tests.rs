//! Integration tests for the trackline library.
//!
//! These tests run the real ORB + RANSAC backend over synthetic frames and
//! verify complete annotation-tracking workflows across modules.

use image::GrayImage;
use trackline::camera_motion::identity;
use trackline::{MotionConfig, SceneMotionEstimator};

/// Deterministic per-pixel hash value. The texture never repeats, so every
/// descriptor is globally distinctive and matches cannot alias onto a
/// lookalike patch elsewhere in the frame.
fn noise_value(x: u32, y: u32) -> u8 {
    let mut v = x.wrapping_mul(0x9E37_79B9) ^ y.wrapping_mul(0x85EB_CA6B);
    v ^= v >> 15;
    v = v.wrapping_mul(0x2C1B_3C6D);
    v ^= v >> 12;
    (v & 0xFF) as u8
}

fn textured_frame(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| image::Luma([noise_value(x, y)]))
}

/// The same texture with its content shifted by `(dx, dy)` pixels.
fn shifted_frame(width: u32, height: u32, dx: i32, dy: i32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let sx = (x as i32 - dx).clamp(0, width as i32 - 1) as u32;
        let sy = (y as i32 - dy).clamp(0, height as i32 - 1) as u32;
        image::Luma([noise_value(sx, sy)])
    })
}

// =============================================================================
// Test 1: Identity against an unmoved camera
// =============================================================================

#[test]
fn test_integration_static_camera_yields_identity() {
    let reference = textured_frame(160, 120);

    let mut estimator =
        SceneMotionEstimator::new(MotionConfig::default()).expect("valid config");
    estimator.set_reference_frame(0, &reference);

    // A later frame with identical content should fit (close to) identity.
    let h = estimator.compute_homography(5, &reference);

    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(
                (h[(i, j)] - expected).abs() < 0.1,
                "H[({}, {})] = {} too far from identity",
                i,
                j,
                h[(i, j)]
            );
        }
    }

    // The track line barely moves under a near-identity transform.
    let line = vec![[40.0, 30.0], [80.0, 60.0], [120.0, 90.0]];
    let transformed = estimator.transform_track_line(&line, 5);
    assert_eq!(transformed.len(), line.len());
    for (p, q) in line.iter().zip(transformed.iter()) {
        assert!((p[0] - q[0]).abs() < 2.0, "x drifted: {} vs {}", p[0], q[0]);
        assert!((p[1] - q[1]).abs() < 2.0, "y drifted: {} vs {}", p[1], q[1]);
    }
}

// =============================================================================
// Test 2: Pure camera translation is recovered
// =============================================================================

#[test]
fn test_integration_translation_recovered() {
    let reference = textured_frame(160, 120);
    let current = shifted_frame(160, 120, 5, 8);

    let mut estimator =
        SceneMotionEstimator::new(MotionConfig::default()).expect("valid config");
    estimator.set_reference_frame(0, &reference);

    // Content moved by (+5, +8), so current coordinates map back to
    // reference coordinates via roughly (-5, -8).
    let h = estimator.compute_homography(1, &current);

    assert!(
        (h[(0, 2)] + 5.0).abs() < 1.5,
        "tx = {}, expected about -5",
        h[(0, 2)]
    );
    assert!(
        (h[(1, 2)] + 8.0).abs() < 1.5,
        "ty = {}, expected about -8",
        h[(1, 2)]
    );

    // Reference-space geometry follows the camera: drawn on the current
    // frame it lands shifted by about (+5, +8).
    let line = vec![[60.0, 50.0], [100.0, 70.0]];
    let transformed = estimator.transform_track_line(&line, 1);
    assert_eq!(transformed.len(), line.len());
    for (p, q) in line.iter().zip(transformed.iter()) {
        assert!(
            (q[0] - p[0] - 5.0).abs() < 2.0,
            "expected x shift about +5, got {}",
            q[0] - p[0]
        );
        assert!(
            (q[1] - p[1] - 8.0).abs() < 2.0,
            "expected y shift about +8, got {}",
            q[1] - p[1]
        );
    }
}

// =============================================================================
// Test 3: Fallback plateau across a degenerate frame
// =============================================================================

#[test]
fn test_integration_fallback_plateau_on_degenerate_frame() {
    let reference = textured_frame(160, 120);
    let current = shifted_frame(160, 120, 5, 8);
    let solid = GrayImage::from_pixel(160, 120, image::Luma([90u8]));

    let mut estimator =
        SceneMotionEstimator::new(MotionConfig::default()).expect("valid config");
    estimator.set_reference_frame(0, &reference);

    let h1 = estimator.compute_homography(1, &current);

    // A solid frame has no features: the estimate from frame 1 survives.
    let h2 = estimator.compute_homography(2, &solid);
    assert_eq!(h1, h2, "fallback must re-use the last valid estimate");
    assert_eq!(estimator.get_homography(2), estimator.get_homography(1));

    // The polyline still transforms, with the stale-but-valid matrix.
    let line = vec![[10.0, 10.0], [20.0, 20.0], [30.0, 30.0]];
    assert_eq!(estimator.transform_track_line(&line, 2).len(), line.len());
}

// =============================================================================
// Test 4: Degenerate reference disables compensation gracefully
// =============================================================================

#[test]
fn test_integration_degenerate_reference_always_identity() {
    let solid = GrayImage::from_pixel(160, 120, image::Luma([90u8]));
    let current = textured_frame(160, 120);

    let mut estimator =
        SceneMotionEstimator::new(MotionConfig::default()).expect("valid config");
    estimator.set_reference_frame(0, &solid);

    for frame_index in 1..5 {
        let h = estimator.compute_homography(frame_index, &current);
        assert_eq!(h, identity());
    }

    let line = vec![[1.0, 1.0], [2.0, 2.0]];
    assert_eq!(estimator.transform_track_line(&line, 3), line);
}

// =============================================================================
// Test 5: clear() restores freshly-constructed behavior
// =============================================================================

#[test]
fn test_integration_clear_resets_session() {
    let reference = textured_frame(160, 120);

    let mut estimator =
        SceneMotionEstimator::new(MotionConfig::default()).expect("valid config");
    estimator.set_reference_frame(0, &reference);
    estimator.compute_homography(1, &reference);
    assert!(estimator.get_homography(1).is_some());

    estimator.clear();
    assert!(estimator.reference_frame_index().is_none());
    assert!(estimator.get_homography(0).is_none());
    assert!(estimator.get_homography(1).is_none());

    // A new session over the same estimator works from scratch.
    estimator.set_reference_frame(10, &reference);
    assert_eq!(estimator.compute_homography(10, &reference), identity());
}
