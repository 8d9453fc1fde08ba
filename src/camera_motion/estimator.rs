//! Scene motion estimator: per-frame homographies against a locked
//! reference frame, with a last-valid fallback plateau.

use std::collections::HashMap;

use image::GrayImage;
use log::{debug, warn};
use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::backend::{OrbRansacBackend, VisionBackend};
use crate::camera_motion::transformations::{
    apply_transform, identity, invert, is_well_formed, transform_points,
};
use crate::features::{Descriptor, Keypoint};
use crate::{Error, Result};

/// Configuration for the scene motion estimator.
///
/// The thresholds are empirically chosen tuning knobs, not correctness
/// requirements; override them as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionConfig {
    /// FAST segment-test threshold for the default backend's detector.
    pub fast_threshold: u8,

    /// Cap on keypoints extracted per frame.
    pub max_keypoints: usize,

    /// Hamming distance cutoff for accepting a descriptor match.
    pub match_distance: u32,

    /// Minimum surviving matches (and current keypoints) required to
    /// attempt a fit. The homography construction itself needs 4.
    pub min_matches: usize,

    /// Maximum reprojection error in pixels for a RANSAC inlier.
    pub reproj_threshold: f64,

    /// RANSAC sampling iterations.
    pub ransac_iterations: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 500,
            match_distance: 50,
            min_matches: 4,
            reproj_threshold: 5.0,
            ransac_iterations: 500,
        }
    }
}

/// The frame at which the user locked geometry, with its extracted
/// correspondence data. Immutable until `clear()`.
struct ReferenceFrame {
    frame_index: i64,
    keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

/// Estimates global camera motion relative to a reference frame.
///
/// Owns the reference frame's descriptor set and a frame-index-keyed cache
/// of fitted homographies. Each cached matrix maps current-frame pixel
/// coordinates into the reference frame's coordinate system.
///
/// Every `compute_homography` path caches something under the requested
/// frame index: a fresh fit, the nearest earlier cached matrix, or identity.
/// A single successful estimate therefore survives as a plateau across
/// frames with no usable correspondence.
pub struct SceneMotionEstimator {
    config: MotionConfig,
    backend: Box<dyn VisionBackend>,
    reference: Option<ReferenceFrame>,
    cache: HashMap<i64, Matrix3<f64>>,
}

impl SceneMotionEstimator {
    /// Create an estimator with the default ORB + RANSAC backend.
    pub fn new(config: MotionConfig) -> Result<Self> {
        let backend = Box::new(OrbRansacBackend::new(
            config.fast_threshold,
            config.max_keypoints,
            config.match_distance,
            config.reproj_threshold,
            config.ransac_iterations,
        ));
        Self::with_backend(config, backend)
    }

    /// Create an estimator over an externally supplied vision backend.
    pub fn with_backend(config: MotionConfig, backend: Box<dyn VisionBackend>) -> Result<Self> {
        if config.min_matches < 4 {
            return Err(Error::InvalidConfig(
                "min_matches must be at least 4 (homography construction)".to_string(),
            ));
        }
        if config.reproj_threshold <= 0.0 || !config.reproj_threshold.is_finite() {
            return Err(Error::InvalidConfig(
                "reproj_threshold must be positive and finite".to_string(),
            ));
        }
        if config.ransac_iterations == 0 {
            return Err(Error::InvalidConfig(
                "ransac_iterations must be non-zero".to_string(),
            ));
        }
        if config.max_keypoints == 0 {
            return Err(Error::InvalidConfig(
                "max_keypoints must be non-zero".to_string(),
            ));
        }

        Ok(Self {
            config,
            backend,
            reference: None,
            cache: HashMap::new(),
        })
    }

    /// Lock the reference frame: extract its keypoints and descriptors and
    /// overwrite any prior reference state.
    ///
    /// When extraction yields nothing (degenerate frame), the reference is
    /// still set but every subsequent computation falls back to identity.
    pub fn set_reference_frame(&mut self, frame_index: i64, image: &GrayImage) {
        let (keypoints, descriptors) = self.backend.extract(image);

        if descriptors.is_empty() {
            warn!(
                "reference frame {} yielded no descriptors; motion compensation disabled",
                frame_index
            );
        } else {
            debug!(
                "reference frame {} locked with {} keypoints",
                frame_index,
                keypoints.len()
            );
        }

        self.reference = Some(ReferenceFrame {
            frame_index,
            keypoints,
            descriptors,
        });

        // The reference frame's own entry is always identity.
        self.cache.insert(frame_index, identity());
    }

    /// Frame index of the locked reference, if any.
    pub fn reference_frame_index(&self) -> Option<i64> {
        self.reference.as_ref().map(|r| r.frame_index)
    }

    /// Compute (and cache) the homography mapping `frame_index`'s pixel
    /// coordinates into the reference frame.
    ///
    /// Never fails: weak or absent correspondence resolves to the nearest
    /// earlier cached matrix, or identity when none exists.
    pub fn compute_homography(&mut self, frame_index: i64, image: &GrayImage) -> Matrix3<f64> {
        let reference = match &self.reference {
            Some(r) => r,
            None => return self.cache_and_return(frame_index, identity()),
        };

        // Exact equality, no epsilon: the reference frame maps to itself.
        if frame_index == reference.frame_index {
            return self.cache_and_return(frame_index, identity());
        }

        if reference.descriptors.is_empty() {
            return self.cache_and_return(frame_index, identity());
        }

        let (keypoints, descriptors) = self.backend.extract(image);
        if keypoints.len() < self.config.min_matches {
            debug!(
                "frame {}: {} keypoints < {}, falling back",
                frame_index,
                keypoints.len(),
                self.config.min_matches
            );
            return self.fallback(frame_index);
        }

        let matches = self
            .backend
            .match_descriptors(&descriptors, &reference.descriptors);
        if matches.len() < self.config.min_matches {
            debug!(
                "frame {}: {} matches < {}, falling back",
                frame_index,
                matches.len(),
                self.config.min_matches
            );
            return self.fallback(frame_index);
        }

        // src = current frame, dst = reference frame: the fitted matrix maps
        // current coordinates into reference coordinates.
        let src: Vec<[f64; 2]> = matches
            .iter()
            .map(|m| {
                let kp = &keypoints[m.query_idx];
                [kp.x as f64, kp.y as f64]
            })
            .collect();
        let dst: Vec<[f64; 2]> = matches
            .iter()
            .map(|m| {
                let kp = &reference.keypoints[m.train_idx];
                [kp.x as f64, kp.y as f64]
            })
            .collect();

        match self.backend.fit_homography(&src, &dst) {
            Some(h) if is_well_formed(&h) => {
                debug!("frame {}: fitted from {} matches", frame_index, matches.len());
                self.cache_and_return(frame_index, h)
            }
            _ => {
                debug!("frame {}: degenerate fit, falling back", frame_index);
                self.fallback(frame_index)
            }
        }
    }

    /// Retrieve the cached homography for a frame, if present.
    pub fn get_homography(&self, frame_index: i64) -> Option<Matrix3<f64>> {
        self.cache.get(&frame_index).copied()
    }

    /// Map a current-frame point into reference-frame coordinates.
    ///
    /// `None` when no homography is cached for the frame.
    pub fn map_to_reference(&self, point: [f64; 2], frame_index: i64) -> Option<[f64; 2]> {
        let h = self.cache.get(&frame_index)?;
        Some(apply_transform(point, h))
    }

    /// Map a reference-frame point into current-frame coordinates.
    ///
    /// `None` when no homography is cached or the cached matrix is singular.
    pub fn map_to_current(&self, point: [f64; 2], frame_index: i64) -> Option<[f64; 2]> {
        let h = self.cache.get(&frame_index)?;
        let inv = invert(h)?;
        Some(apply_transform(point, &inv))
    }

    /// Transform a reference-space track line into the given frame's
    /// coordinates.
    ///
    /// Always returns a polyline of the same length. When no entry is cached
    /// for the frame, or the cached matrix is singular, the input is
    /// returned unchanged.
    pub fn transform_track_line(&self, points: &[[f64; 2]], frame_index: i64) -> Vec<[f64; 2]> {
        let inv = match self.cache.get(&frame_index).and_then(invert) {
            Some(inv) => inv,
            None => return points.to_vec(),
        };

        transform_points(points, &inv)
    }

    /// Reset all cached entries and reference state. Idempotent.
    pub fn clear(&mut self) {
        self.reference = None;
        self.cache.clear();
    }

    fn cache_and_return(&mut self, frame_index: i64, h: Matrix3<f64>) -> Matrix3<f64> {
        self.cache.insert(frame_index, h);
        h
    }

    /// Scan cached entries backward from `frame_index - 1` down to 0 and
    /// re-cache the first hit under `frame_index`; identity when the scan
    /// comes up empty.
    fn fallback(&mut self, frame_index: i64) -> Matrix3<f64> {
        for earlier in (0..frame_index).rev() {
            if let Some(h) = self.cache.get(&earlier).copied() {
                return self.cache_and_return(frame_index, h);
            }
        }
        self.cache_and_return(frame_index, identity())
    }
}
