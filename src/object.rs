//! Tracked object and bounding box data model.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// Global ID counter for unique IDs across all tracking sessions
static GLOBAL_ID_COUNTER: AtomicI64 = AtomicI64::new(0);

/// Allocate the next auto-incremented object id.
///
/// Used when upstream callers do not assign ids themselves. Ids are unique
/// and monotonic for the lifetime of the process.
pub fn next_object_id() -> i64 {
    GLOBAL_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// An axis-aligned bounding box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl BoundingBox {
    /// Create a new bounding box.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area of the box in square pixels.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Center point of the box.
    pub fn center(&self) -> [f64; 2] {
        [self.x + self.width / 2.0, self.y + self.height / 2.0]
    }

    /// Clip this box to the extent of a `frame_width` x `frame_height` frame.
    ///
    /// The result may have zero width or height when the box lies entirely
    /// outside the frame.
    pub fn clip(&self, frame_width: u32, frame_height: u32) -> Self {
        let fw = frame_width as f64;
        let fh = frame_height as f64;

        let x1 = self.x.max(0.0).min(fw);
        let y1 = self.y.max(0.0).min(fh);
        let x2 = (self.x + self.width).max(0.0).min(fw);
        let y2 = (self.y + self.height).max(0.0).min(fh);

        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }
}

/// A user-marked object being re-localized across frames.
///
/// The position state (`center`, `bounding_box`) is mutated only by the
/// template tracker's per-frame update; the grayscale template itself is
/// owned by the tracker, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    /// Unique object id (user-assigned or from [`next_object_id`]).
    pub id: i64,

    /// Last known center in frame pixel coordinates.
    pub center: [f64; 2],

    /// Last known bounding box.
    pub bounding_box: BoundingBox,
}

impl TrackedObject {
    /// Create a tracked object with an explicit id.
    ///
    /// # Errors
    /// Returns [`Error::InvalidObject`] when the box has non-finite or
    /// negative dimensions.
    pub fn new(id: i64, bounding_box: BoundingBox) -> Result<Self> {
        if !bounding_box.width.is_finite()
            || !bounding_box.height.is_finite()
            || bounding_box.width < 0.0
            || bounding_box.height < 0.0
        {
            return Err(Error::InvalidObject(format!(
                "bounding box dimensions must be finite and non-negative, got {}x{}",
                bounding_box.width, bounding_box.height
            )));
        }

        Ok(Self {
            id,
            center: bounding_box.center(),
            bounding_box,
        })
    }

    /// Create a tracked object with an auto-incremented id.
    pub fn with_next_id(bounding_box: BoundingBox) -> Result<Self> {
        Self::new(next_object_id(), bounding_box)
    }
}
