//! Homography application and inversion utilities.
//!
//! All operations degrade gracefully: near-zero homogeneous scales return
//! the input point unchanged, and near-singular matrices refuse to invert
//! instead of producing garbage.

use nalgebra::Matrix3;

/// Determinant / homogeneous-scale magnitude below which a matrix or
/// projective division is treated as singular.
pub const SINGULARITY_EPSILON: f64 = 1e-10;

/// The identity homography.
pub fn identity() -> Matrix3<f64> {
    Matrix3::identity()
}

/// A homography is well-formed iff its determinant is bounded away from
/// zero.
pub fn is_well_formed(h: &Matrix3<f64>) -> bool {
    h.determinant().abs() > SINGULARITY_EPSILON
}

/// Closed-form 3x3 inversion via the adjugate and determinant.
///
/// Returns `None` when `|det| < SINGULARITY_EPSILON`.
pub fn invert(h: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let det = h.determinant();
    if det.abs() < SINGULARITY_EPSILON {
        return None;
    }

    let m = |r: usize, c: usize| h[(r, c)];
    let adjugate = Matrix3::new(
        m(1, 1) * m(2, 2) - m(1, 2) * m(2, 1),
        m(0, 2) * m(2, 1) - m(0, 1) * m(2, 2),
        m(0, 1) * m(1, 2) - m(0, 2) * m(1, 1),
        m(1, 2) * m(2, 0) - m(1, 0) * m(2, 2),
        m(0, 0) * m(2, 2) - m(0, 2) * m(2, 0),
        m(0, 2) * m(1, 0) - m(0, 0) * m(1, 2),
        m(1, 0) * m(2, 1) - m(1, 1) * m(2, 0),
        m(0, 1) * m(2, 0) - m(0, 0) * m(2, 1),
        m(0, 0) * m(1, 1) - m(0, 1) * m(1, 0),
    );

    Some(adjugate / det)
}

/// Apply a homography to a 2D point: `(x', y', w') = H * (x, y, 1)`, final
/// coordinates `(x'/w', y'/w')`.
///
/// When `|w'|` is near zero the input point is returned unchanged rather
/// than dividing by it.
pub fn apply_transform(point: [f64; 2], h: &Matrix3<f64>) -> [f64; 2] {
    let [x, y] = point;
    let xp = h[(0, 0)] * x + h[(0, 1)] * y + h[(0, 2)];
    let yp = h[(1, 0)] * x + h[(1, 1)] * y + h[(1, 2)];
    let wp = h[(2, 0)] * x + h[(2, 1)] * y + h[(2, 2)];

    if wp.abs() < SINGULARITY_EPSILON {
        return point;
    }

    [xp / wp, yp / wp]
}

/// Apply a homography to every point of a polyline. Output length always
/// equals input length.
pub fn transform_points(points: &[[f64; 2]], h: &Matrix3<f64>) -> Vec<[f64; 2]> {
    points.iter().map(|&p| apply_transform(p, h)).collect()
}
