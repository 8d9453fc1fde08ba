//! Global scene motion estimation.
//!
//! Computes a per-frame homography relating current-frame pixel coordinates
//! to the reference frame's coordinate system, with a cache-backed fallback
//! policy for frames where correspondence is weak or absent.

pub mod estimator;
pub mod transformations;

pub use estimator::{MotionConfig, SceneMotionEstimator};
pub use transformations::{apply_transform, identity, invert, is_well_formed, transform_points};
