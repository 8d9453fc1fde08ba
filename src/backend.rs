//! Pluggable vision backend: feature extraction, descriptor matching, and
//! robust homography fitting behind one capability trait.
//!
//! The scene motion estimator depends only on [`VisionBackend`], so the
//! concrete detector/matcher/fitter can be swapped at runtime (or mocked in
//! tests) without touching the estimation logic.

use image::GrayImage;
use nalgebra::{DMatrix, Matrix3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::features::{match_descriptors, Descriptor, DescriptorMatch, Keypoint, OrbExtractor};

/// Fixed seed for RANSAC sampling; fitting is deterministic for identical
/// correspondences.
const RANSAC_SEED: u64 = 0x7261_6e73_6163_0004;

/// Determinant magnitude below which a fitted matrix is considered
/// degenerate.
const DEGENERACY_EPSILON: f64 = 1e-10;

/// Capability interface over an externally supplied vision implementation.
pub trait VisionBackend: Send {
    /// Extract keypoints and binary descriptors from a grayscale frame.
    ///
    /// Degenerate frames yield empty vectors, never an error.
    fn extract(&self, image: &GrayImage) -> (Vec<Keypoint>, Vec<Descriptor>);

    /// Match `query` descriptors against `train` descriptors.
    fn match_descriptors(&self, query: &[Descriptor], train: &[Descriptor])
        -> Vec<DescriptorMatch>;

    /// Fit a homography mapping `src` points onto `dst` points, tolerating
    /// outlier correspondences. Returns `None` for degenerate input.
    fn fit_homography(&self, src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>>;
}

/// Default backend: ORB-style extraction with RANSAC over a normalized DLT.
pub struct OrbRansacBackend {
    extractor: OrbExtractor,
    /// Hamming distance cutoff for accepting a descriptor match.
    pub match_distance: u32,
    /// Maximum reprojection error in pixels for a RANSAC inlier.
    pub reproj_threshold: f64,
    /// Number of RANSAC sampling iterations.
    pub ransac_iterations: usize,
}

impl OrbRansacBackend {
    /// Create a backend with the given detector and fitting parameters.
    pub fn new(
        fast_threshold: u8,
        max_keypoints: usize,
        match_distance: u32,
        reproj_threshold: f64,
        ransac_iterations: usize,
    ) -> Self {
        Self {
            extractor: OrbExtractor::new(fast_threshold, max_keypoints),
            match_distance,
            reproj_threshold,
            ransac_iterations,
        }
    }
}

impl Default for OrbRansacBackend {
    fn default() -> Self {
        Self::new(20, 500, 50, 5.0, 500)
    }
}

impl VisionBackend for OrbRansacBackend {
    fn extract(&self, image: &GrayImage) -> (Vec<Keypoint>, Vec<Descriptor>) {
        self.extractor.extract(image)
    }

    fn match_descriptors(
        &self,
        query: &[Descriptor],
        train: &[Descriptor],
    ) -> Vec<DescriptorMatch> {
        match_descriptors(query, train, self.match_distance)
    }

    fn fit_homography(&self, src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
        ransac_homography(
            src,
            dst,
            self.ransac_iterations,
            self.reproj_threshold,
            RANSAC_SEED,
        )
    }
}

/// Project a point through a homography. Returns `None` when the
/// homogeneous scale collapses.
fn project(h: &Matrix3<f64>, p: &[f64; 2]) -> Option<[f64; 2]> {
    let w = h[(2, 0)] * p[0] + h[(2, 1)] * p[1] + h[(2, 2)];
    if w.abs() < DEGENERACY_EPSILON {
        return None;
    }
    Some([
        (h[(0, 0)] * p[0] + h[(0, 1)] * p[1] + h[(0, 2)]) / w,
        (h[(1, 0)] * p[0] + h[(1, 1)] * p[1] + h[(1, 2)]) / w,
    ])
}

/// Similarity transform centering points on their centroid at mean distance
/// sqrt(2). Returns `None` when all points coincide.
fn normalizing_transform(points: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < DEGENERACY_EPSILON {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Direct linear transform homography from 4+ correspondences, with Hartley
/// normalization for conditioning.
///
/// Returns `None` for degenerate configurations (collinear points, coincident
/// points, singular solutions).
pub fn fit_homography_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Option<Matrix3<f64>> {
    if src.len() < 4 || src.len() != dst.len() {
        return None;
    }

    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    let norm = |t: &Matrix3<f64>, p: &[f64; 2]| -> [f64; 2] {
        [t[(0, 0)] * p[0] + t[(0, 2)], t[(1, 1)] * p[1] + t[(1, 2)]]
    };

    let n = src.len();
    // The thin SVD of a wide-enough system carries the full V^T. For the
    // minimal 4-correspondence case the system is 8x9 and the nullspace
    // vector would be missing, so pad with zero rows (they do not change
    // the solution).
    let rows = (2 * n).max(9);
    let mut a = DMatrix::zeros(rows, 9);
    for i in 0..n {
        let [x, y] = norm(&t_src, &src[i]);
        let [xp, yp] = norm(&t_dst, &dst[i]);

        a[(2 * i, 0)] = -x;
        a[(2 * i, 1)] = -y;
        a[(2 * i, 2)] = -1.0;
        a[(2 * i, 6)] = x * xp;
        a[(2 * i, 7)] = y * xp;
        a[(2 * i, 8)] = xp;

        a[(2 * i + 1, 3)] = -x;
        a[(2 * i + 1, 4)] = -y;
        a[(2 * i + 1, 5)] = -1.0;
        a[(2 * i + 1, 6)] = x * yp;
        a[(2 * i + 1, 7)] = y * yp;
        a[(2 * i + 1, 8)] = yp;
    }

    // Solution is the right singular vector of the smallest singular value;
    // nalgebra sorts singular values in decreasing order.
    let svd = a.svd(false, true);
    let v_t = svd.v_t?;
    let h_vec = v_t.row(v_t.nrows() - 1);

    let h_norm = Matrix3::new(
        h_vec[0], h_vec[1], h_vec[2], h_vec[3], h_vec[4], h_vec[5], h_vec[6], h_vec[7], h_vec[8],
    );

    // Denormalize: H = T_dst^-1 * H_norm * T_src
    let t_dst_inv = t_dst.try_inverse()?;
    let mut h = t_dst_inv * h_norm * t_src;

    if h[(2, 2)].abs() < DEGENERACY_EPSILON {
        return None;
    }
    h /= h[(2, 2)];

    if h.determinant().abs() < DEGENERACY_EPSILON {
        return None;
    }

    Some(h)
}

/// RANSAC homography estimation: repeated minimal-sample DLT fits scored by
/// inlier count, followed by a refit over the best consensus set.
pub fn ransac_homography(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    iterations: usize,
    reproj_threshold: f64,
    seed: u64,
) -> Option<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || n != dst.len() {
        return None;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut best_h: Option<Matrix3<f64>> = None;
    let mut best_inliers = 0usize;

    for _ in 0..iterations {
        let indices = rand::seq::index::sample(&mut rng, n, 4);
        let sample_src: Vec<[f64; 2]> = indices.iter().map(|i| src[i]).collect();
        let sample_dst: Vec<[f64; 2]> = indices.iter().map(|i| dst[i]).collect();

        if let Some(h) = fit_homography_dlt(&sample_src, &sample_dst) {
            let inliers = count_inliers(&h, src, dst, reproj_threshold);
            if inliers > best_inliers {
                best_inliers = inliers;
                best_h = Some(h);
            }
        }
    }

    let h = best_h?;
    if best_inliers < 4 {
        return None;
    }

    // Refit over the full consensus set of the best model.
    let mut inlier_src = Vec::with_capacity(best_inliers);
    let mut inlier_dst = Vec::with_capacity(best_inliers);
    for i in 0..n {
        if reprojection_error(&h, &src[i], &dst[i])
            .map(|e| e < reproj_threshold)
            .unwrap_or(false)
        {
            inlier_src.push(src[i]);
            inlier_dst.push(dst[i]);
        }
    }

    fit_homography_dlt(&inlier_src, &inlier_dst).or(Some(h))
}

fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> Option<f64> {
    let p = project(h, src)?;
    Some(((p[0] - dst[0]).powi(2) + (p[1] - dst[1]).powi(2)).sqrt())
}

fn count_inliers(
    h: &Matrix3<f64>,
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    threshold: f64,
) -> usize {
    src.iter()
        .zip(dst.iter())
        .filter(|(s, d)| {
            reprojection_error(h, s, d)
                .map(|e| e < threshold)
                .unwrap_or(false)
        })
        .count()
}
