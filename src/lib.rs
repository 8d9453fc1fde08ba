//! # Trackline - Annotation Tracking for Moving-Camera Video
//!
//! A lightweight library for frame-accurate video annotation: a reference
//! line drawn on one paused frame stays correctly positioned as the camera
//! moves, and manually marked objects are re-localized frame to frame.
//!
//! ## Features
//!
//! - Global scene motion estimation via robust homography fitting over
//!   binary feature correspondences
//! - Per-object template re-localization with bounded-window normalized
//!   cross-correlation search
//! - Pluggable vision backend (feature extraction / matching / fitting)
//! - Graceful degradation: weak or absent correspondence falls back to the
//!   last valid estimate instead of failing
//!
//! ## Example
//!
//! ```rust,ignore
//! use trackline::{SceneMotionEstimator, MotionConfig};
//!
//! let mut estimator = SceneMotionEstimator::new(MotionConfig::default())?;
//! estimator.set_reference_frame(0, &reference_image);
//!
//! // Once per rendered frame:
//! let h = estimator.compute_homography(frame_index, &current_image);
//! let line = estimator.transform_track_line(&track_line, frame_index);
//! ```

// Public modules
pub mod backend;
pub mod camera_motion;
pub mod features;
pub mod object;
pub mod readiness;
pub mod tracker;
pub mod utils;

// Re-exports for convenience
pub use backend::{OrbRansacBackend, VisionBackend};
pub use camera_motion::{MotionConfig, SceneMotionEstimator};
pub use features::{Descriptor, DescriptorMatch, Keypoint, OrbExtractor};
pub use object::{BoundingBox, TrackedObject};
pub use readiness::ReadinessGate;
pub use tracker::{TemplateTracker, TemplateTrackerConfig};

// Error types
pub use crate::error::{Error, Result};

mod error {
    use thiserror::Error;

    /// Errors that can occur in the trackline library.
    ///
    /// Recoverable per-frame conditions (insufficient features, degenerate
    /// fits, low-confidence matches) are never surfaced through this enum;
    /// they resolve to documented fallback values inside the engines.
    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Invalid frame: {0}")]
        InvalidFrame(String),

        #[error("Invalid tracked object: {0}")]
        InvalidObject(String),

        #[error("Vision backend unavailable: {0}")]
        BackendUnavailable(String),
    }

    /// Result type for trackline operations
    pub type Result<T> = std::result::Result<T, Error>;
}
