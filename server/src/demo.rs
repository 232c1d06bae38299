//! A single synthetic image, bound at startup so the binary is runnable
//! without a real upstream: `sizeX=3200`, `sizeY=2560`, `Z=1`, `C=3`, `T=30`,
//! 16-bit little-endian samples, native 256x256 tiles, three resolution
//! levels, per-pixel content `(x mod 256, y mod 256)`.

use std::sync::Arc;

use zarr_model::{
    ChannelMetadata, Endianness, MetadataSource, Pixels, PixelBuffer, PixelSource, RawMask, Rect, RoiRecord,
    ServiceError, Tile,
};

pub const DEMO_IMAGE_ID: i64 = 1;

struct DemoBuffer {
    resolution_descriptions: Vec<(u32, u32)>,
}

impl DemoBuffer {
    fn new() -> DemoBuffer {
        DemoBuffer {
            resolution_descriptions: vec![(3200, 2560), (1600, 1280), (800, 640)],
        }
    }
}

impl PixelBuffer for DemoBuffer {
    fn size_x(&self) -> u32 {
        self.resolution_descriptions[0].0
    }
    fn size_y(&self) -> u32 {
        self.resolution_descriptions[0].1
    }
    fn size_z(&self) -> u32 {
        1
    }
    fn size_c(&self) -> u32 {
        3
    }
    fn size_t(&self) -> u32 {
        30
    }
    fn byte_width(&self) -> u8 {
        2
    }
    fn is_signed(&self) -> bool {
        false
    }
    fn is_float(&self) -> bool {
        false
    }
    fn tile_size(&self) -> (u32, u32) {
        (256, 256)
    }
    fn resolution_levels(&self) -> usize {
        self.resolution_descriptions.len()
    }
    fn resolution_descriptions(&self) -> Vec<(u32, u32)> {
        self.resolution_descriptions.clone()
    }
    fn set_resolution_level(&self, _level: usize) -> Result<(), ServiceError> {
        Ok(())
    }
    fn get_tile(&self, _z: u32, _c: u32, _t: u32, x: u32, y: u32, w: u32, h: u32) -> Result<Tile, ServiceError> {
        let mut data = Vec::with_capacity(w as usize * h as usize * 2);
        for row in 0..h {
            for col in 0..w {
                data.push(((x + col) % 256) as u8);
                data.push(((y + row) % 256) as u8);
            }
        }
        Ok(Tile { data, endianness: Endianness::Little })
    }
    fn close(&self) {}
}

pub struct DemoPixelSource;

impl PixelSource for DemoPixelSource {
    fn open_buffer(&self, _pixels: &Pixels) -> Result<Arc<dyn PixelBuffer>, ServiceError> {
        Ok(Arc::new(DemoBuffer::new()))
    }
}

pub struct DemoMetadataSource;

impl MetadataSource for DemoMetadataSource {
    fn get_pixels(&self, image_id: i64) -> Result<Pixels, ServiceError> {
        if image_id != DEMO_IMAGE_ID {
            return Err(ServiceError::not_found(format!("unknown image {image_id}")));
        }
        Ok(Pixels {
            image_id,
            owner_id: 1,
            name: Some("demo".to_owned()),
            channels: vec![ChannelMetadata::default(); 3],
            rendering_settings: Vec::new(),
        })
    }

    fn get_mask(&self, mask_id: i64) -> Result<RawMask, ServiceError> {
        // A single 64x64 square mask near the image origin, for roi 1.
        if mask_id != 1 {
            return Err(ServiceError::not_found(format!("unknown mask {mask_id}")));
        }
        RawMask::new(
            Rect { x: 0, y: 0, w: 64, h: 64 },
            zarr_model::PlaneRestriction::default(),
            vec![0xFFu8; (64 * 64usize).div_ceil(8)],
        )
    }

    fn get_roi(&self, roi_id: i64) -> Result<RoiRecord, ServiceError> {
        if roi_id != 1 {
            return Err(ServiceError::not_found(format!("unknown roi {roi_id}")));
        }
        Ok(RoiRecord { id: roi_id, image_id: DEMO_IMAGE_ID, rgba: 0x00FF00FF })
    }

    fn get_mask_ids_of_roi(&self, roi_id: i64) -> Result<Vec<i64>, ServiceError> {
        Ok(if roi_id == 1 { vec![1] } else { Vec::new() })
    }

    fn get_roi_ids_of_image(&self, image_id: i64) -> Result<Vec<i64>, ServiceError> {
        Ok(if image_id == DEMO_IMAGE_ID { vec![1] } else { Vec::new() })
    }

    fn get_roi_ids_with_mask_of_image(&self, image_id: i64) -> Result<Vec<i64>, ServiceError> {
        self.get_roi_ids_of_image(image_id)
    }
}
