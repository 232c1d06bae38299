//! Labeled and split mask array rendering.

use zarr_config::OverlapValue;
use zarr_mask::{Mask, UnionMask};
use zarr_model::ServiceError;
use zarr_shape::DataShape;

use crate::chunk::compress_chunk;
use crate::chunk_origin;

/// One ROI's fused bitmask, in the image's canonical (ascending id) order.
pub struct RoiMask {
    pub roi_id: i64,
    pub mask: UnionMask,
}

fn resolve_overlap(matches: &[i64], overlap: &OverlapValue) -> u64 {
    match overlap {
        OverlapValue::Fixed(v) => *v,
        OverlapValue::Highest => *matches.iter().max().expect("non-empty") as u64,
        OverlapValue::Lowest => *matches.iter().min().expect("non-empty") as u64,
        // No sentinel configured: the image's canonical ROI order already
        // determines write order, so the last writer (highest id, since
        // callers pass `rois` in ascending order) simply wins.
        OverlapValue::Unset => *matches.last().expect("non-empty") as u64,
    }
}

/// Renders one labeled-array chunk: a zero-initialised `u64`-per-pixel
/// buffer where each pixel is 0 (uncovered), a single ROI's id, or the
/// configured overlap value, then DEFLATE-compresses it.
pub fn render_labeled_chunk(
    rois: &[RoiMask],
    shape: &DataShape,
    index: [u32; 5],
    overlap: &OverlapValue,
    zlib_level: u32,
) -> Result<Vec<u8>, ServiceError> {
    let (it, ic, z0, y0, x0) = chunk_origin(shape, index)?;
    const ELEM: usize = 8;
    let row_elems = shape.chunk_x as usize;
    let plane_elems = row_elems * shape.chunk_y as usize;
    let mut body = vec![0u8; plane_elems * shape.chunk_z as usize * ELEM];

    let mut matches = Vec::new();
    for p in 0..shape.chunk_z {
        let z = z0 + p;
        if z >= shape.z {
            break;
        }
        let readers: Vec<_> = rois
            .iter()
            .filter_map(|r| r.mask.reader(z, ic, it).map(|reader| (r.roi_id, reader)))
            .collect();
        if readers.is_empty() {
            continue;
        }
        for local_y in 0..shape.chunk_y {
            let y = y0 + local_y;
            if y >= shape.y {
                break;
            }
            for local_x in 0..shape.chunk_x {
                let x = x0 + local_x;
                if x >= shape.x {
                    break;
                }
                matches.clear();
                for (roi_id, reader) in &readers {
                    if reader.test(x, y) {
                        matches.push(*roi_id);
                    }
                }
                if matches.is_empty() {
                    continue;
                }
                let value = if matches.len() == 1 {
                    matches[0] as u64
                } else {
                    resolve_overlap(&matches, overlap)
                };
                let elem_index = p as usize * plane_elems + local_y as usize * row_elems + local_x as usize;
                let offset = elem_index * ELEM;
                body[offset..offset + ELEM].copy_from_slice(&value.to_le_bytes());
            }
        }
    }

    compress_chunk(&body, zlib_level)
}

/// Renders one split (per-ROI, boolean) array chunk: one byte per pixel, 0
/// or 1 according to the union mask's coverage.
pub fn render_split_chunk(
    mask: &UnionMask,
    shape: &DataShape,
    index: [u32; 5],
    zlib_level: u32,
) -> Result<Vec<u8>, ServiceError> {
    let (it, ic, z0, y0, x0) = chunk_origin(shape, index)?;
    let row_elems = shape.chunk_x as usize;
    let plane_elems = row_elems * shape.chunk_y as usize;
    let mut body = vec![0u8; plane_elems * shape.chunk_z as usize];

    for p in 0..shape.chunk_z {
        let z = z0 + p;
        if z >= shape.z {
            break;
        }
        let Some(reader) = mask.reader(z, ic, it) else {
            continue;
        };
        for local_y in 0..shape.chunk_y {
            let y = y0 + local_y;
            if y >= shape.y {
                break;
            }
            for local_x in 0..shape.chunk_x {
                let x = x0 + local_x;
                if x >= shape.x {
                    break;
                }
                if reader.test(x, y) {
                    let elem_index = p as usize * plane_elems + local_y as usize * row_elems + local_x as usize;
                    body[elem_index] = 1;
                }
            }
        }
    }

    compress_chunk(&body, zlib_level)
}
