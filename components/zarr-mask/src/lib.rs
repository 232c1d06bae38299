//! Planar packed bitmasks: `ImageMask` is the primitive shape, `UnionMask`
//! composes several of them. Both answer the same three questions —
//! `is_significant`, `reader`, `size_estimate` — through the `Mask` trait;
//! expressed as two concrete types rather than a dynamic interface, since
//! the set of shapes is closed.

use zarr_model::{PlaneRestriction, RawMask, Rect};

/// The five dimensions a mask can be asked about significance in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaskDimension {
    X,
    Y,
    Z,
    C,
    T,
}

pub trait Mask {
    fn is_significant(&self, dim: MaskDimension) -> bool;
    /// A reader for plane `(z, c, t)`, or `None` if the mask does not apply
    /// to that plane at all.
    fn reader(&self, z: u32, c: u32, t: u32) -> Option<PlaneReader<'_>>;
    fn size_estimate(&self) -> usize;
}

/// Tests a mask at a single pixel, treating "no reader at this plane" as
/// `false`.
pub fn test<M: Mask + ?Sized>(mask: &M, z: u32, c: u32, t: u32, x: u32, y: u32) -> bool {
    mask.reader(z, c, t).map(|r| r.test(x, y)).unwrap_or(false)
}

/// An evaluator bound to one plane. `Image` wraps a single `ImageMask`;
/// `Union` ORs together the readers of whichever members apply.
pub enum PlaneReader<'a> {
    Image(&'a ImageMask),
    Union(Vec<PlaneReader<'a>>),
}

impl PlaneReader<'_> {
    pub fn test(&self, x: u32, y: u32) -> bool {
        match self {
            PlaneReader::Image(mask) => mask.test_pixel(x, y),
            PlaneReader::Union(readers) => readers.iter().any(|r| r.test(x, y)),
        }
    }
}

/// An immutable planar bitmask: a rectangle, optional Z/C/T plane
/// restrictions, and a packed, MSB-first, X-major payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageMask {
    rect: Rect,
    restriction: PlaneRestriction,
    payload: Vec<u8>,
}

impl ImageMask {
    /// Builds a mask from raw parts, defensively copying `payload`.
    /// Panics-free: callers that already validated the payload length via
    /// `RawMask::new` can rely on it here; this constructor re-validates.
    pub fn new(rect: Rect, restriction: PlaneRestriction, payload: &[u8]) -> Option<ImageMask> {
        let expected = (rect.w as usize * rect.h as usize).div_ceil(8);
        if payload.len() != expected || rect.w == 0 || rect.h == 0 {
            return None;
        }
        Some(ImageMask {
            rect,
            restriction,
            payload: payload.to_vec(),
        })
    }

    /// Wraps an ingress `RawMask`, copying its payload.
    pub fn from_raw(raw: &RawMask) -> ImageMask {
        ImageMask {
            rect: raw.rect,
            restriction: raw.restriction,
            payload: raw.payload.clone(),
        }
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn restriction(&self) -> PlaneRestriction {
        self.restriction
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// `bitIndex = (x-rx) + (y-ry)*w`, MSB-first within the byte.
    pub fn test_pixel(&self, x: u32, y: u32) -> bool {
        if !self.rect.contains(x, y) {
            return false;
        }
        let (byte, bit) = bit_position(self.rect, x, y);
        (self.payload[byte] >> bit) & 1 == 1
    }
}

impl Mask for ImageMask {
    fn is_significant(&self, dim: MaskDimension) -> bool {
        match dim {
            MaskDimension::X | MaskDimension::Y => true,
            MaskDimension::Z => self.restriction.z.is_some(),
            MaskDimension::C => self.restriction.c.is_some(),
            MaskDimension::T => self.restriction.t.is_some(),
        }
    }

    fn reader(&self, z: u32, c: u32, t: u32) -> Option<PlaneReader<'_>> {
        self.restriction
            .matches(z, c, t)
            .then_some(PlaneReader::Image(self))
    }

    fn size_estimate(&self) -> usize {
        self.payload.len()
    }
}

fn bit_position(rect: Rect, x: u32, y: u32) -> (usize, u32) {
    let local_x = (x - rect.x) as u64;
    let local_y = (y - rect.y) as u64;
    let bit_index = local_x + local_y * rect.w as u64;
    ((bit_index / 8) as usize, 7 - (bit_index % 8) as u32)
}

fn restrictions_conflict(a: PlaneRestriction, b: PlaneRestriction) -> bool {
    fn conflicts(a: Option<u32>, b: Option<u32>) -> bool {
        matches!((a, b), (Some(a), Some(b)) if a != b)
    }
    conflicts(a.z, b.z) || conflicts(a.c, b.c) || conflicts(a.t, b.t)
}

/// True when the significant regions of `a` and `b` intersect.
pub fn overlap(a: &ImageMask, b: &ImageMask) -> bool {
    if restrictions_conflict(a.restriction, b.restriction) {
        return false;
    }
    if a.rect == b.rect {
        return a
            .payload
            .iter()
            .zip(b.payload.iter())
            .any(|(x, y)| x & y != 0);
    }
    let x0 = a.rect.x.max(b.rect.x);
    let y0 = a.rect.y.max(b.rect.y);
    let x1 = (a.rect.x + a.rect.w).min(b.rect.x + b.rect.w);
    let y1 = (a.rect.y + a.rect.h).min(b.rect.y + b.rect.h);
    if x0 >= x1 || y0 >= y1 {
        return false;
    }
    for y in y0..y1 {
        for x in x0..x1 {
            if a.test_pixel(x, y) && b.test_pixel(x, y) {
                return true;
            }
        }
    }
    false
}

/// `None` when no single rectangle can represent the result.
pub fn union(a: &ImageMask, b: &ImageMask) -> Option<ImageMask> {
    if a.restriction != b.restriction {
        return None;
    }
    if a.rect.encloses(&b.rect) {
        Some(or_into(a, b))
    } else if b.rect.encloses(&a.rect) {
        Some(or_into(b, a))
    } else {
        None
    }
}

/// ORs `inner`'s bits into a copy of `outer`'s payload. `outer` must enclose
/// `inner`.
fn or_into(outer: &ImageMask, inner: &ImageMask) -> ImageMask {
    let mut payload = outer.payload.clone();
    if outer.rect == inner.rect {
        for (dst, src) in payload.iter_mut().zip(inner.payload.iter()) {
            *dst |= src;
        }
    } else {
        for y in inner.rect.y..inner.rect.y + inner.rect.h {
            for x in inner.rect.x..inner.rect.x + inner.rect.w {
                if inner.test_pixel(x, y) {
                    let (byte, bit) = bit_position(outer.rect, x, y);
                    payload[byte] |= 1 << bit;
                }
            }
        }
    }
    ImageMask {
        rect: outer.rect,
        restriction: outer.restriction,
        payload,
    }
}

/// An ordered collection of `ImageMask`s whose combined significance per
/// dimension is the logical OR of its members'.
#[derive(Clone, Debug, Default)]
pub struct UnionMask {
    members: Vec<ImageMask>,
}

impl UnionMask {
    pub fn build<I: IntoIterator<Item = ImageMask>>(masks: I) -> UnionMask {
        let mut members: Vec<ImageMask> = Vec::new();
        for incoming in masks {
            let mut fused_into = None;
            for (index, existing) in members.iter().enumerate() {
                if let Some(fused) = union(existing, &incoming) {
                    fused_into = Some((index, fused));
                    break;
                }
            }
            match fused_into {
                Some((index, fused)) => members[index] = fused,
                None => members.push(incoming),
            }
        }
        UnionMask { members }
    }

    pub fn members(&self) -> &[ImageMask] {
        &self.members
    }
}

impl Mask for UnionMask {
    fn is_significant(&self, dim: MaskDimension) -> bool {
        self.members.iter().any(|m| m.is_significant(dim))
    }

    fn reader(&self, z: u32, c: u32, t: u32) -> Option<PlaneReader<'_>> {
        let readers: Vec<PlaneReader<'_>> =
            self.members.iter().filter_map(|m| m.reader(z, c, t)).collect();
        if readers.is_empty() {
            None
        } else {
            Some(PlaneReader::Union(readers))
        }
    }

    fn size_estimate(&self) -> usize {
        self.members.iter().map(Mask::size_estimate).sum()
    }
}
