//! Feature correspondence layer: FAST keypoints with oriented binary
//! descriptors and Hamming matching.
//!
//! Extraction is deterministic for identical pixel input and detector
//! parameters. Degenerate frames (solid color, smaller than the detection
//! border) yield empty results rather than errors; callers treat an empty
//! result as "insufficient features".

use std::cmp::Ordering;
use std::collections::HashSet;

use image::GrayImage;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Number of intensity-pair tests per descriptor (256 bits = 32 bytes).
const PATTERN_SIZE: usize = 256;

/// Fixed seed for the descriptor test pattern; descriptors from different
/// extractor instances stay comparable.
const PATTERN_SEED: u64 = 0x0b5e_55ed_0000_0256;

/// Segment-test circle offsets (Bresenham circle of radius 3, 16 pixels).
const CIRCLE_OFFSETS: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// A salient image location with orientation for rotation invariance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Column coordinate in pixels.
    pub x: f32,
    /// Row coordinate in pixels.
    pub y: f32,
    /// Corner strength used for ranking and suppression.
    pub response: f32,
    /// Intensity-centroid orientation in radians.
    pub angle: f32,
}

/// 256-bit binary descriptor, compared by Hamming distance.
pub type Descriptor = [u8; 32];

/// A nearest-neighbor correspondence between two descriptor sets.
#[derive(Debug, Clone, Copy)]
pub struct DescriptorMatch {
    /// Index into the query (current frame) set.
    pub query_idx: usize,
    /// Index into the train (reference frame) set.
    pub train_idx: usize,
    /// Hamming distance between the matched descriptors.
    pub distance: u32,
}

/// ORB-style feature extractor: FAST-9 corners, intensity-centroid
/// orientation, rotated binary intensity-pair descriptors.
pub struct OrbExtractor {
    /// Minimum intensity delta for the segment test.
    pub fast_threshold: u8,
    /// Cap on the number of returned keypoints.
    pub max_keypoints: usize,
    /// Suppression radius for grid non-maximum suppression.
    pub nms_radius: f32,
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new(20, 500)
    }
}

impl OrbExtractor {
    /// Create an extractor with the given FAST threshold and keypoint cap.
    pub fn new(fast_threshold: u8, max_keypoints: usize) -> Self {
        Self {
            fast_threshold,
            max_keypoints,
            nms_radius: 5.0,
            pattern: generate_test_pattern(),
        }
    }

    /// Extract keypoints and descriptors from a grayscale frame.
    ///
    /// Returns empty vectors for degenerate frames; never fails.
    pub fn extract(&self, image: &GrayImage) -> (Vec<Keypoint>, Vec<Descriptor>) {
        // Segment test needs a 3-pixel border on each side.
        if image.width() < 7 || image.height() < 7 {
            return (Vec::new(), Vec::new());
        }

        let corners = self.detect_corners(image);
        let keypoints: Vec<Keypoint> = self
            .suppress_non_maxima(corners)
            .into_iter()
            .map(|mut kp| {
                kp.angle = compute_orientation(image, kp.x as u32, kp.y as u32);
                kp
            })
            .collect();

        let descriptors = keypoints
            .iter()
            .map(|kp| self.compute_descriptor(image, kp))
            .collect();

        (keypoints, descriptors)
    }

    /// FAST-9 segment test over the full frame interior.
    fn detect_corners(&self, image: &GrayImage) -> Vec<Keypoint> {
        let (width, height) = (image.width(), image.height());
        let mut corners = Vec::new();

        for y in 3..(height - 3) {
            for x in 3..(width - 3) {
                let center = image.get_pixel(x, y)[0];

                if !self.cardinal_pre_check(image, x, y, center) {
                    continue;
                }

                if self.segment_test(image, x, y, center) {
                    corners.push(Keypoint {
                        x: x as f32,
                        y: y as f32,
                        response: corner_response(image, x, y),
                        angle: 0.0,
                    });
                }
            }
        }

        corners
    }

    /// Cheap rejection: a 9-pixel contiguous arc always covers at least 2
    /// of the 4 cardinal circle pixels, so a center with fewer than 2
    /// uniformly brighter or darker cardinals cannot pass the segment test.
    fn cardinal_pre_check(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);

        let pixels = [
            image.get_pixel(x, y - 3)[0],
            image.get_pixel(x + 3, y)[0],
            image.get_pixel(x, y + 3)[0],
            image.get_pixel(x - 3, y)[0],
        ];

        let n_bright = pixels.iter().filter(|&&p| p > bright).count();
        let n_dark = pixels.iter().filter(|&&p| p < dark).count();

        n_bright >= 2 || n_dark >= 2
    }

    /// Full segment test: 9 contiguous circle pixels brighter or darker than
    /// the center by the threshold. The circle is walked twice to handle
    /// wraparound.
    fn segment_test(&self, image: &GrayImage, x: u32, y: u32, center: u8) -> bool {
        let bright = center.saturating_add(self.fast_threshold);
        let dark = center.saturating_sub(self.fast_threshold);

        let mut run_bright = 0u32;
        let mut run_dark = 0u32;
        let mut best_bright = 0u32;
        let mut best_dark = 0u32;

        for i in 0..(CIRCLE_OFFSETS.len() * 2) {
            let (dx, dy) = CIRCLE_OFFSETS[i % CIRCLE_OFFSETS.len()];
            let px = (x as i32 + dx) as u32;
            let py = (y as i32 + dy) as u32;
            let pixel = image.get_pixel(px, py)[0];

            if pixel > bright {
                run_bright += 1;
                run_dark = 0;
                best_bright = best_bright.max(run_bright);
            } else if pixel < dark {
                run_dark += 1;
                run_bright = 0;
                best_dark = best_dark.max(run_dark);
            } else {
                run_bright = 0;
                run_dark = 0;
            }
        }

        best_bright >= 9 || best_dark >= 9
    }

    /// Grid-based non-maximum suppression, keeping at most `max_keypoints`
    /// corners ordered by response.
    fn suppress_non_maxima(&self, mut corners: Vec<Keypoint>) -> Vec<Keypoint> {
        if corners.is_empty() {
            return corners;
        }

        // Deterministic ordering: response descending, position as tie-break.
        corners.sort_by(|a, b| {
            b.response
                .partial_cmp(&a.response)
                .unwrap_or(Ordering::Equal)
                .then_with(|| (a.y as u32, a.x as u32).cmp(&(b.y as u32, b.x as u32)))
        });

        let mut selected = Vec::new();
        let mut occupied: HashSet<(i32, i32)> = HashSet::new();

        for corner in corners {
            let gx = (corner.x / self.nms_radius) as i32;
            let gy = (corner.y / self.nms_radius) as i32;

            let mut is_maximum = true;
            'grid: for dy in -1..=1 {
                for dx in -1..=1 {
                    if occupied.contains(&(gx + dx, gy + dy)) {
                        is_maximum = false;
                        break 'grid;
                    }
                }
            }

            if is_maximum {
                occupied.insert((gx, gy));
                selected.push(corner);
                if selected.len() >= self.max_keypoints {
                    break;
                }
            }
        }

        selected
    }

    /// Binary descriptor from the rotated intensity-pair test pattern.
    fn compute_descriptor(&self, image: &GrayImage, keypoint: &Keypoint) -> Descriptor {
        let mut descriptor = [0u8; 32];
        let x = keypoint.x as i32;
        let y = keypoint.y as i32;
        let (sin_a, cos_a) = keypoint.angle.sin_cos();
        let max_x = image.width() as i32 - 1;
        let max_y = image.height() as i32 - 1;

        let sample = |dx: i32, dy: i32| -> u8 {
            let rx = (dx as f32 * cos_a - dy as f32 * sin_a).round() as i32;
            let ry = (dx as f32 * sin_a + dy as f32 * cos_a).round() as i32;
            let px = (x + rx).clamp(0, max_x) as u32;
            let py = (y + ry).clamp(0, max_y) as u32;
            image.get_pixel(px, py)[0]
        };

        for (byte_idx, tests) in self.pattern.chunks(8).enumerate() {
            let mut byte_val = 0u8;
            for (bit_idx, &(dx1, dy1, dx2, dy2)) in tests.iter().enumerate() {
                if sample(dx1, dy1) < sample(dx2, dy2) {
                    byte_val |= 1 << bit_idx;
                }
            }
            descriptor[byte_idx] = byte_val;
        }

        descriptor
    }
}

/// Intensity-centroid orientation over a radius-15 disc, clamped to the
/// image extent.
fn compute_orientation(image: &GrayImage, x: u32, y: u32) -> f32 {
    let radius: i32 = 15;
    let mut m01 = 0.0f32;
    let mut m10 = 0.0f32;

    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }

            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px < 0 || py < 0 || px >= image.width() as i32 || py >= image.height() as i32 {
                continue;
            }

            let intensity = image.get_pixel(px as u32, py as u32)[0] as f32;
            m01 += intensity * dy as f32;
            m10 += intensity * dx as f32;
        }
    }

    m01.atan2(m10)
}

/// Local intensity standard deviation as a corner strength measure.
fn corner_response(image: &GrayImage, x: u32, y: u32) -> f32 {
    let mut sum = 0.0f32;
    let mut sum_sq = 0.0f32;
    let mut count = 0u32;

    for dy in -2i32..=2 {
        for dx in -2i32..=2 {
            let px = x as i32 + dx;
            let py = y as i32 + dy;
            if px >= 0 && py >= 0 && (px as u32) < image.width() && (py as u32) < image.height() {
                let intensity = image.get_pixel(px as u32, py as u32)[0] as f32;
                sum += intensity;
                sum_sq += intensity * intensity;
                count += 1;
            }
        }
    }

    let mean = sum / count as f32;
    let variance = (sum_sq / count as f32) - mean * mean;
    variance.max(0.0).sqrt()
}

/// Generate the fixed intensity-pair test pattern from a seeded generator.
///
/// Offsets fall within a 27x27 patch around the keypoint, the same extent a
/// learned ORB table uses.
fn generate_test_pattern() -> Vec<(i32, i32, i32, i32)> {
    let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
    (0..PATTERN_SIZE)
        .map(|_| {
            (
                rng.gen_range(-13..=13),
                rng.gen_range(-13..=13),
                rng.gen_range(-13..=13),
                rng.gen_range(-13..=13),
            )
        })
        .collect()
}

/// Hamming distance between two binary descriptors.
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Cross-checked nearest-neighbor matching of `query` descriptors against
/// `train`.
///
/// A pair survives only when each descriptor is the other's nearest neighbor
/// by Hamming distance and the distance is below `max_distance`. The mutual
/// check sheds ambiguous correspondences in repetitive scenes, where several
/// queries would otherwise collapse onto the same train descriptor.
pub fn match_descriptors(
    query: &[Descriptor],
    train: &[Descriptor],
    max_distance: u32,
) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let backward: Vec<usize> = query
        .iter()
        .map(|q| nearest(q, train).0)
        .collect();

    let mut matches = Vec::new();
    for (train_idx, t) in train.iter().enumerate() {
        let (query_idx, distance) = nearest(t, query);
        if backward[query_idx] == train_idx && distance < max_distance {
            matches.push(DescriptorMatch {
                query_idx,
                train_idx,
                distance,
            });
        }
    }

    matches.sort_by_key(|m| m.query_idx);
    matches
}

/// Index and Hamming distance of the closest descriptor in `set`.
fn nearest(descriptor: &Descriptor, set: &[Descriptor]) -> (usize, u32) {
    let mut best = (0usize, u32::MAX);
    for (idx, candidate) in set.iter().enumerate() {
        let distance = hamming_distance(descriptor, candidate);
        if distance < best.1 {
            best = (idx, distance);
        }
    }
    best
}
