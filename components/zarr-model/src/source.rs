use std::sync::Arc;

use crate::error::ServiceError;
use crate::pixels::{Pixels, Tile};

/// A rectangle in image-plane coordinates. `w` and `h` are always >= 1 for a
/// valid mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }

    /// Whether `self` encloses `other` entirely.
    pub fn encloses(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.x + other.w <= self.x + self.w
            && other.y + other.h <= self.y + self.h
    }
}

/// Per-dimension plane restriction: `None` means "applies to all planes".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PlaneRestriction {
    pub z: Option<u32>,
    pub c: Option<u32>,
    pub t: Option<u32>,
}

impl PlaneRestriction {
    /// Whether this restriction matches the given plane.
    pub fn matches(&self, z: u32, c: u32, t: u32) -> bool {
        self.z.is_none_or(|v| v == z)
            && self.c.is_none_or(|v| v == c)
            && self.t.is_none_or(|v| v == t)
    }
}

/// The raw bitmask record as returned by a `MetadataSource`, before it is
/// wrapped into an immutable `zarr_mask::ImageMask` (which defensively copies
/// `payload`).
#[derive(Clone, Debug)]
pub struct RawMask {
    pub rect: Rect,
    pub restriction: PlaneRestriction,
    pub payload: Vec<u8>,
}

impl RawMask {
    /// Builds a raw mask, validating that `payload.len()` equals
    /// `ceil(w*h/8)`.
    pub fn new(rect: Rect, restriction: PlaneRestriction, payload: Vec<u8>) -> Result<Self, ServiceError> {
        let expected = (rect.w as usize * rect.h as usize).div_ceil(8);
        if payload.len() != expected {
            return Err(ServiceError::upstream(format!(
                "mask payload length {} does not match expected {expected} for {}x{} rectangle",
                payload.len(),
                rect.w,
                rect.h
            )));
        }
        Ok(RawMask {
            rect,
            restriction,
            payload,
        })
    }
}

/// An identified ROI belonging to one image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoiRecord {
    pub id: i64,
    pub image_id: i64,
    /// Packed RGBA, as written verbatim into the labeled mask's `.zattrs`
    /// color list.
    pub rgba: u32,
}

/// An open, resolution-scoped handle onto an upstream pixel buffer.
///
/// Implementations must be safe to call from multiple leases concurrently
/// for read-only operations; `set_resolution_level` is only ever called by
/// the cache while holding its internal lock (see `zarr-cache`).
pub trait PixelBuffer: Send + Sync {
    fn size_x(&self) -> u32;
    fn size_y(&self) -> u32;
    fn size_z(&self) -> u32;
    fn size_c(&self) -> u32;
    fn size_t(&self) -> u32;
    fn byte_width(&self) -> u8;
    fn is_signed(&self) -> bool;
    fn is_float(&self) -> bool;
    /// Native upstream tile size as `(x, y)`.
    fn tile_size(&self) -> (u32, u32);
    /// Total number of resolution levels the upstream reports.
    fn resolution_levels(&self) -> usize;
    /// `(X, Y)` full extent per resolution level, in the upstream's own
    /// low-to-high order.
    fn resolution_descriptions(&self) -> Vec<(u32, u32)>;
    /// Repositions the buffer onto upstream resolution index `level`.
    fn set_resolution_level(&self, level: usize) -> Result<(), ServiceError>;
    fn get_tile(
        &self,
        z: u32,
        c: u32,
        t: u32,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
    ) -> Result<Tile, ServiceError>;
    fn close(&self);
}

pub trait PixelSource: Send + Sync {
    /// Opens a buffer for `pixels`. Non-deterministic regarding shared
    /// instances: callers (the cache) must not assume two calls return
    /// distinct objects, nor that they return the same one.
    fn open_buffer(&self, pixels: &Pixels) -> Result<Arc<dyn PixelBuffer>, ServiceError>;
}

pub trait MetadataSource: Send + Sync {
    fn get_pixels(&self, image_id: i64) -> Result<Pixels, ServiceError>;
    fn get_mask(&self, mask_id: i64) -> Result<RawMask, ServiceError>;
    fn get_roi(&self, roi_id: i64) -> Result<RoiRecord, ServiceError>;
    fn get_mask_ids_of_roi(&self, roi_id: i64) -> Result<Vec<i64>, ServiceError>;
    fn get_roi_ids_of_image(&self, image_id: i64) -> Result<Vec<i64>, ServiceError>;
    /// Only ROIs that have at least one bitmask shape.
    fn get_roi_ids_with_mask_of_image(&self, image_id: i64) -> Result<Vec<i64>, ServiceError>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rect_contains_and_encloses() {
        let outer = Rect { x: 0, y: 0, w: 10, h: 10 };
        let inner = Rect { x: 2, y: 2, w: 4, h: 4 };
        assert!(outer.encloses(&inner));
        assert!(!inner.encloses(&outer));
        assert!(outer.contains(9, 9));
        assert!(!outer.contains(10, 0));
    }

    #[test]
    fn plane_restriction_all_matches_everything() {
        let restriction = PlaneRestriction::default();
        assert!(restriction.matches(0, 0, 0));
        assert!(restriction.matches(5, 3, 29));
    }

    #[test]
    fn plane_restriction_specific_index_only_matches_that_plane() {
        let restriction = PlaneRestriction {
            z: Some(2),
            c: None,
            t: Some(0),
        };
        assert!(restriction.matches(2, 7, 0));
        assert!(!restriction.matches(3, 7, 0));
        assert!(!restriction.matches(2, 7, 1));
    }

    #[test]
    fn raw_mask_rejects_wrong_payload_length() {
        let rect = Rect { x: 0, y: 0, w: 3, h: 3 };
        let err = RawMask::new(rect, PlaneRestriction::default(), vec![0u8; 1]).unwrap_err();
        assert!(matches!(err, ServiceError::Upstream(_)));
    }

    #[test]
    fn raw_mask_accepts_exact_payload_length() {
        // 3x3 bits -> ceil(9/8) == 2 bytes
        let rect = Rect { x: 0, y: 0, w: 3, h: 3 };
        assert!(RawMask::new(rect, PlaneRestriction::default(), vec![0u8; 2]).is_ok());
    }
}
