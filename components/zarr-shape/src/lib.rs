//! Per-resolution 5-D geometry and the chunk-size enlargement policy
//! (`DataShape`).

/// A dimension eligible for chunk-size enlargement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    X,
    Y,
    Z,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::X => "X",
            Dimension::Y => "Y",
            Dimension::Z => "Z",
        }
    }

    pub fn parse(s: &str) -> Option<Dimension> {
        match s {
            "X" => Some(Dimension::X),
            "Y" => Some(Dimension::Y),
            "Z" => Some(Dimension::Z),
            _ => None,
        }
    }
}

/// The default `chunk.size.adjust` order.
pub const DEFAULT_ADJUST_ORDER: [Dimension; 3] = [Dimension::X, Dimension::Y, Dimension::Z];

/// The five full-extent sizes, the byte width per sample, and the derived
/// chunk extent for one `(imageId, resolution)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataShape {
    pub t: u32,
    pub c: u32,
    pub z: u32,
    pub y: u32,
    pub x: u32,
    pub byte_width: u8,
    pub chunk_z: u32,
    pub chunk_y: u32,
    pub chunk_x: u32,
}

impl DataShape {
    /// Derives a `DataShape` from the upstream's native tile geometry and the
    /// configured minimum chunk byte target, per the enlargement procedure in
    /// Enlarges the native tile along `adjust_order` until `min_bytes` is met.
    pub fn compute(
        t: u32,
        c: u32,
        z: u32,
        y: u32,
        x: u32,
        native_tile: (u32, u32),
        byte_width: u8,
        min_bytes: u64,
        adjust_order: &[Dimension],
    ) -> DataShape {
        let (chunk_x, chunk_y, chunk_z) =
            compute_chunk_extent(x, y, z, native_tile, byte_width, min_bytes, adjust_order);
        DataShape {
            t,
            c,
            z,
            y,
            x,
            byte_width,
            chunk_z,
            chunk_y,
            chunk_x,
        }
    }

    pub fn shape(&self) -> [u32; 5] {
        [self.t, self.c, self.z, self.y, self.x]
    }

    pub fn chunks(&self) -> [u32; 5] {
        [1, 1, self.chunk_z, self.chunk_y, self.chunk_x]
    }

    /// Number of chunks along each of the five dimensions.
    pub fn chunk_counts(&self) -> [u32; 5] {
        [
            self.t,
            self.c,
            self.z.div_ceil(self.chunk_z),
            self.y.div_ceil(self.chunk_y),
            self.x.div_ceil(self.chunk_x),
        ]
    }
}

fn enlarge_linear(current: u32, size: u32) -> u32 {
    if current.saturating_mul(3) >= size {
        size
    } else {
        current.saturating_mul(2)
    }
}

fn enlarge_z(current: u32, size: u32) -> u32 {
    let doubled = current.saturating_mul(2).max(1);
    let num_chunks = size.div_ceil(doubled).max(1);
    size.div_ceil(num_chunks)
}

fn compute_chunk_extent(
    x_size: u32,
    y_size: u32,
    z_size: u32,
    native_tile: (u32, u32),
    byte_width: u8,
    min_bytes: u64,
    adjust_order: &[Dimension],
) -> (u32, u32, u32) {
    let mut x = native_tile.0.min(x_size.max(1)).max(1);
    let mut y = native_tile.1.min(y_size.max(1)).max(1);
    let mut z = 1u32.min(z_size.max(1)).max(1);

    for dim in adjust_order {
        loop {
            let bytes = x as u64 * y as u64 * z as u64 * byte_width as u64;
            if bytes >= min_bytes {
                break;
            }
            let progressed = match dim {
                Dimension::X => {
                    let next = enlarge_linear(x, x_size);
                    let changed = next != x;
                    x = next;
                    changed
                },
                Dimension::Y => {
                    let next = enlarge_linear(y, y_size);
                    let changed = next != y;
                    y = next;
                    changed
                },
                Dimension::Z => {
                    let next = enlarge_z(z, z_size);
                    let changed = next != z;
                    z = next;
                    changed
                },
            };
            if !progressed {
                break;
            }
        }
    }

    (x, y, z)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chunk_extent_never_exceeds_image_extent() {
        let (x, y, z) = compute_chunk_extent(3200, 2560, 1, (256, 256), 2, 1_048_576, &DEFAULT_ADJUST_ORDER);
        assert!(x <= 3200);
        assert!(y <= 2560);
        assert!(z <= 1);
    }

    #[test]
    fn chunk_extent_meets_minimum_byte_target_when_possible() {
        let (x, y, z) = compute_chunk_extent(3200, 2560, 1, (256, 256), 2, 1_048_576, &DEFAULT_ADJUST_ORDER);
        let bytes = x as u64 * y as u64 * z as u64 * 2;
        assert!(bytes >= 1_048_576);
    }

    #[test]
    fn chunk_extent_x_and_y_stay_256_aligned_or_snap_to_full_size() {
        // Doubling from a 256-aligned seed stays 256-aligned until the "snap
        // to size" branch fires.
        let (x, y, _z) = compute_chunk_extent(3200, 2560, 1, (256, 256), 2, 1_048_576, &DEFAULT_ADJUST_ORDER);
        assert_eq!(x % 256, 0);
        assert_eq!(y % 256, 0);
    }

    #[test]
    fn z_enlargement_redistributes_evenly() {
        // 10 planes, doubling from 1 -> 2 -> distribute: ceil(10/2)=5 chunks -> zTile=ceil(10/5)=2.
        let z_next = enlarge_z(1, 10);
        assert_eq!(z_next, 2);
    }

    #[test]
    fn z_enlargement_saturates_at_full_extent() {
        assert_eq!(enlarge_z(10, 10), 10);
    }

    #[test]
    fn linear_enlargement_snaps_to_size_near_the_end() {
        // current=90, size=100: 90*3=270 >= 100 -> snap to 100.
        assert_eq!(enlarge_linear(90, 100), 100);
        // current=10, size=100: 10*3=30 < 100 -> double.
        assert_eq!(enlarge_linear(10, 100), 20);
    }

    #[test]
    fn dimensions_not_in_adjust_list_are_never_enlarged() {
        let (x, y, z) = compute_chunk_extent(3200, 2560, 50, (256, 256), 2, 1_048_576, &[Dimension::X]);
        assert_eq!(y, 256);
        assert_eq!(z, 1);
        assert!(x > 256);
    }

    #[test]
    fn data_shape_shape_and_chunks_match_spec_layout() {
        let shape = DataShape::compute(30, 3, 1, 2560, 3200, (256, 256), 2, 1_048_576, &DEFAULT_ADJUST_ORDER);
        assert_eq!(shape.shape(), [30, 3, 1, 2560, 3200]);
        assert_eq!(shape.chunks()[0], 1);
        assert_eq!(shape.chunks()[1], 1);
    }

    #[test]
    fn dimension_parse_round_trips() {
        assert_eq!(Dimension::parse("X"), Some(Dimension::X));
        assert_eq!(Dimension::parse("Y"), Some(Dimension::Y));
        assert_eq!(Dimension::parse("Z"), Some(Dimension::Z));
        assert_eq!(Dimension::parse("Q"), None);
        assert_eq!(Dimension::X.as_str(), "X");
    }
}
