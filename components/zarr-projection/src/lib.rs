//! Virtual Zarr v2 hierarchy projection: URL dispatch, JSON metadata
//! documents, chunk assembly, and mask projection.

mod chunk;
mod json;
mod listing;
mod mask;

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use zarr_cache::PixelBufferCache;
use zarr_config::{Config, FolderLayout};
use zarr_mask::{ImageMask, UnionMask};
use zarr_model::{Endianness, MetadataSource, PixelBuffer, PixelSource, ServiceError};
use zarr_shape::DataShape;

use mask::RoiMask;

pub enum Response {
    Json(Value),
    Html(String),
    Binary(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayKind {
    Image { image_id: i64, resolution: usize },
    MaskLabeled { image_id: i64 },
    MaskSplit { image_id: i64, roi_id: i64 },
}

pub struct Projection {
    config: Arc<Config>,
    cache: Arc<PixelBufferCache>,
    metadata: Arc<dyn MetadataSource>,
    path_regex: Regex,
}

impl Projection {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<PixelBufferCache>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Projection {
        let path_regex = build_path_regex(&config.net_path_image);
        Projection {
            config,
            cache,
            metadata,
            path_regex,
        }
    }

    pub fn handle(&self, path: &str) -> Result<Response, ServiceError> {
        let captures = self
            .path_regex
            .captures(path)
            .ok_or_else(|| ServiceError::not_found("no route matches path"))?;
        let image_id: i64 = captures[1].parse()?;
        let suffix = &captures[2];

        if suffix.is_empty() {
            return self.image_directory(image_id);
        }
        if suffix == ".zgroup" {
            return Ok(Response::Json(json!({ "zarr_format": 2 })));
        }
        if suffix == ".zattrs" {
            return self.image_zattrs(image_id);
        }
        if let Some(rest) = suffix.strip_prefix("masks/") {
            return self.masks(image_id, rest);
        }
        self.resolution(image_id, suffix)
    }

    fn image_directory(&self, image_id: i64) -> Result<Response, ServiceError> {
        self.require_listing_layout()?;
        let pixels = self.metadata.get_pixels(image_id)?;
        let levels = self.resolution_levels(image_id)?;
        let _ = pixels;
        let mut entries = vec![".zgroup".to_owned(), ".zattrs".to_owned(), "masks/".to_owned()];
        entries.extend((0..levels).map(|r| format!("{r}/")));
        Ok(Response::Html(listing::build_html_listing(
            &format!("/image/{image_id}.zarr/"),
            &entries,
        )))
    }

    fn image_zattrs(&self, image_id: i64) -> Result<Response, ServiceError> {
        let pixels = self.metadata.get_pixels(image_id)?;
        let levels = self.resolution_levels(image_id)?;
        Ok(Response::Json(json::build_zattrs(&pixels, levels)))
    }

    fn resolution_levels(&self, image_id: i64) -> Result<usize, ServiceError> {
        let lease = self.cache.acquire(image_id, 0)?;
        Ok(lease.resolution_levels())
    }

    fn resolution(&self, image_id: i64, suffix: &str) -> Result<Response, ServiceError> {
        let (res_str, rest) = suffix
            .split_once('/')
            .ok_or_else(|| ServiceError::not_found("unrecognised path"))?;
        let resolution: usize = res_str.parse()?;
        self.array_route(ArrayKind::Image { image_id, resolution }, rest)
    }

    fn masks(&self, image_id: i64, rest: &str) -> Result<Response, ServiceError> {
        if rest == ".zgroup" {
            return Ok(Response::Json(json!({ "zarr_format": 2 })));
        }
        if rest == ".zattrs" {
            return self.masks_zattrs(image_id);
        }
        if rest.is_empty() {
            self.require_listing_layout()?;
            let roi_ids = self.masks_listing_roi_ids(image_id)?;
            let mut entries = vec![".zgroup".to_owned(), ".zattrs".to_owned(), "labeled/".to_owned()];
            entries.extend(roi_ids.into_iter().map(|id| format!("{id}/")));
            return Ok(Response::Html(listing::build_html_listing(
                &format!("/image/{image_id}.zarr/masks/"),
                &entries,
            )));
        }
        if let Some(labeled_rest) = rest.strip_prefix("labeled/") {
            return self.array_route(ArrayKind::MaskLabeled { image_id }, labeled_rest);
        }
        if !self.config.mask_split_enable {
            return Err(ServiceError::not_found("mask split arrays are disabled"));
        }
        let (roi_str, roi_rest) = rest
            .split_once('/')
            .ok_or_else(|| ServiceError::not_found("unrecognised mask path"))?;
        let roi_id: i64 = roi_str.parse()?;
        self.array_route(ArrayKind::MaskSplit { image_id, roi_id }, roi_rest)
    }

    fn masks_listing_roi_ids(&self, image_id: i64) -> Result<Vec<i64>, ServiceError> {
        if self.config.mask_split_enable {
            self.metadata.get_roi_ids_with_mask_of_image(image_id)
        } else {
            Ok(Vec::new())
        }
    }

    fn masks_zattrs(&self, image_id: i64) -> Result<Response, ServiceError> {
        let mut masks = vec![json!("labeled")];
        for roi_id in self.masks_listing_roi_ids(image_id)? {
            masks.push(json!(roi_id));
        }
        Ok(Response::Json(json!({ "masks": masks })))
    }

    fn array_route(&self, kind: ArrayKind, rest: &str) -> Result<Response, ServiceError> {
        if rest == ".zarray" {
            return self.array_zarray(kind);
        }
        if rest == ".zattrs" {
            return self.array_zattrs(kind);
        }
        if rest.is_empty() {
            return self.array_listing(kind, &[]);
        }
        if let Some(stripped) = rest.strip_suffix('/') {
            if !stripped.is_empty() && self.config.folder_layout == FolderLayout::Nested {
                if let Some(prefix) = parse_numeric_components(stripped) {
                    return self.array_listing(kind, &prefix);
                }
            }
        }
        let index = parse_chunk_key(rest, self.config.folder_layout)?;
        self.chunk(kind, index)
    }

    fn array_zarray(&self, kind: ArrayKind) -> Result<Response, ServiceError> {
        match kind {
            ArrayKind::Image { image_id, resolution } => {
                let lease = self.cache.acquire(image_id, resolution)?;
                let shape = self.image_data_shape(&lease);
                let probe = lease.get_tile(0, 0, 0, 0, 0, 1, 1)?;
                let little_endian = matches!(probe.endianness, Endianness::Little);
                let dtype = json::dtype_string(lease.byte_width(), lease.is_signed(), lease.is_float(), little_endian);
                Ok(Response::Json(json::build_zarray(&shape, &dtype, self.config.compress_zlib_level)))
            },
            ArrayKind::MaskLabeled { image_id } => {
                let (shape, _lease) = self.mask_data_shape(image_id, 8)?;
                Ok(Response::Json(json::build_zarray(&shape, "<u8", self.config.compress_zlib_level)))
            },
            ArrayKind::MaskSplit { image_id, .. } => {
                let (shape, _lease) = self.mask_data_shape(image_id, 1)?;
                Ok(Response::Json(json::build_zarray(&shape, "|u1", self.config.compress_zlib_level)))
            },
        }
    }

    /// The `color` list attached to the labeled array's own `.zattrs`
    /// Not defined for the image array or split arrays.
    fn array_zattrs(&self, kind: ArrayKind) -> Result<Response, ServiceError> {
        let ArrayKind::MaskLabeled { image_id } = kind else {
            return Err(ServiceError::not_found("this array has no .zattrs"));
        };
        let roi_ids = self.metadata.get_roi_ids_with_mask_of_image(image_id)?;
        let mut colors: Vec<Value> = Vec::with_capacity(roi_ids.len() + 1);
        for roi_id in roi_ids {
            let roi = self.metadata.get_roi(roi_id)?;
            colors.push(json!({ "label": roi_id, "rgba": roi.rgba }));
        }
        if let Some(overlap_color) = self.config.mask_overlap_color {
            colors.push(json!({ "label": "overlap", "rgba": overlap_color }));
        }
        Ok(Response::Json(json!({ "color": colors })))
    }

    fn array_listing(&self, kind: ArrayKind, prefix: &[u32]) -> Result<Response, ServiceError> {
        self.require_listing_layout()?;
        let shape = match kind {
            ArrayKind::Image { image_id, resolution } => {
                let lease = self.cache.acquire(image_id, resolution)?;
                self.image_data_shape(&lease)
            },
            ArrayKind::MaskLabeled { image_id } => self.mask_data_shape(image_id, 8)?.0,
            ArrayKind::MaskSplit { image_id, .. } => self.mask_data_shape(image_id, 1)?.0,
        };
        let counts = shape.chunk_counts();

        let mut entries = Vec::new();
        if prefix.is_empty() {
            entries.push(".zarray".to_owned());
            if let ArrayKind::MaskLabeled { .. } = kind {
                entries.push(".zattrs".to_owned());
            }
        }

        match self.config.folder_layout {
            FolderLayout::Nested => {
                let depth = prefix.len();
                if depth >= 5 {
                    return Err(ServiceError::not_found("chunk coordinate prefix too long"));
                }
                for value in 0..counts[depth] {
                    entries.push(if depth == 4 { format!("{value}") } else { format!("{value}/") });
                }
            },
            FolderLayout::Flattened => {
                for it in 0..counts[0] {
                    for ic in 0..counts[1] {
                        for iz in 0..counts[2] {
                            for iy in 0..counts[3] {
                                for ix in 0..counts[4] {
                                    entries.push(format!("{it}.{ic}.{iz}.{iy}.{ix}"));
                                }
                            }
                        }
                    }
                }
            },
            FolderLayout::None => unreachable!("guarded by require_listing_layout"),
        }

        Ok(Response::Html(listing::build_html_listing("/", &entries)))
    }

    fn chunk(&self, kind: ArrayKind, index: [u32; 5]) -> Result<Response, ServiceError> {
        match kind {
            ArrayKind::Image { image_id, resolution } => {
                let lease = self.cache.acquire(image_id, resolution)?;
                let shape = self.image_data_shape(&lease);
                let bytes = chunk::assemble_image_chunk(&*lease, &shape, index, self.config.compress_zlib_level)?;
                Ok(Response::Binary(bytes))
            },
            ArrayKind::MaskLabeled { image_id } => {
                let rois = self.load_roi_masks(image_id)?;
                let (shape, _lease) = self.mask_data_shape(image_id, 8)?;
                let bytes = mask::render_labeled_chunk(
                    &rois,
                    &shape,
                    index,
                    &self.config.mask_overlap_value,
                    self.config.compress_zlib_level,
                )?;
                Ok(Response::Binary(bytes))
            },
            ArrayKind::MaskSplit { image_id, roi_id } => {
                let union_mask = self.load_roi_union_mask(roi_id)?;
                let (shape, _lease) = self.mask_data_shape(image_id, 1)?;
                let bytes = mask::render_split_chunk(&union_mask, &shape, index, self.config.compress_zlib_level)?;
                Ok(Response::Binary(bytes))
            },
        }
    }

    fn image_data_shape(&self, buffer: &dyn PixelBuffer) -> DataShape {
        DataShape::compute(
            buffer.size_t(),
            buffer.size_c(),
            buffer.size_z(),
            buffer.size_y(),
            buffer.size_x(),
            buffer.tile_size(),
            buffer.byte_width(),
            self.config.chunk_size_min,
            &self.config.chunk_size_adjust,
        )
    }

    /// Derives a mask array's shape from the image's highest-resolution
    /// buffer, at mask `byte_width` (8 for the labeled uint64 array, 1 for a
    /// split boolean array).
    fn mask_data_shape(
        &self,
        image_id: i64,
        byte_width: u8,
    ) -> Result<(DataShape, zarr_cache::BufferLease), ServiceError> {
        let lease = self.cache.acquire(image_id, 0)?;
        let shape = DataShape::compute(
            lease.size_t(),
            lease.size_c(),
            lease.size_z(),
            lease.size_y(),
            lease.size_x(),
            lease.tile_size(),
            byte_width,
            self.config.chunk_size_min,
            &self.config.chunk_size_adjust,
        );
        Ok((shape, lease))
    }

    fn load_roi_masks(&self, image_id: i64) -> Result<Vec<RoiMask>, ServiceError> {
        let roi_ids = self.metadata.get_roi_ids_with_mask_of_image(image_id)?;
        roi_ids
            .into_iter()
            .map(|roi_id| {
                let mask = self.load_roi_union_mask(roi_id)?;
                Ok(RoiMask { roi_id, mask })
            })
            .collect()
    }

    fn load_roi_union_mask(&self, roi_id: i64) -> Result<UnionMask, ServiceError> {
        let mask_ids = self.metadata.get_mask_ids_of_roi(roi_id)?;
        let masks: Vec<ImageMask> = mask_ids
            .into_iter()
            .map(|mask_id| self.metadata.get_mask(mask_id).map(|raw| ImageMask::from_raw(&raw)))
            .collect::<Result<_, _>>()?;
        Ok(UnionMask::build(masks))
    }

    fn require_listing_layout(&self) -> Result<(), ServiceError> {
        if self.config.folder_layout == FolderLayout::None {
            Err(ServiceError::not_found("directory listings are disabled"))
        } else {
            Ok(())
        }
    }
}

/// Computes the chunk origin `(t, c, z0, y0, x0)` for `index` and validates
/// it against `shape`'s full extent. Shared by image and mask chunk
/// rendering, which differ only in element width.
pub(crate) fn chunk_origin(shape: &DataShape, index: [u32; 5]) -> Result<(u32, u32, u32, u32, u32), ServiceError> {
    let [it, ic, iz, iy, ix] = index;
    let z0 = iz * shape.chunk_z;
    let y0 = iy * shape.chunk_y;
    let x0 = ix * shape.chunk_x;
    if it >= shape.t || ic >= shape.c || z0 >= shape.z || y0 >= shape.y || x0 >= shape.x {
        return Err(ServiceError::not_found("chunk index out of range"));
    }
    Ok((it, ic, z0, y0, x0))
}

fn build_path_regex(template: &str) -> Regex {
    let mut pattern = String::from("^");
    match template.split_once("{image}") {
        Some((prefix, rest)) => {
            pattern.push_str(&regex::escape(prefix));
            pattern.push_str(r"(\d+)");
            pattern.push_str(&regex::escape(rest));
        },
        None => pattern.push_str(&regex::escape(template)),
    }
    pattern.push_str("(.*)$");
    Regex::new(&pattern).expect("path template regex always compiles; Config validates the {image} placeholder")
}

fn parse_numeric_components(s: &str) -> Option<Vec<u32>> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() > 4 {
        return None;
    }
    parts.iter().map(|p| p.parse::<u32>().ok()).collect()
}

fn parse_chunk_key(rest: &str, layout: FolderLayout) -> Result<[u32; 5], ServiceError> {
    let parts: Vec<&str> = match layout {
        FolderLayout::Nested => rest.split('/').collect(),
        _ => rest.split('.').collect(),
    };
    if parts.len() != 5 {
        return Err(ServiceError::not_found("malformed chunk key"));
    }
    let mut out = [0u32; 5];
    for (slot, part) in out.iter_mut().zip(parts.iter()) {
        *slot = part.parse::<u32>().map_err(ServiceError::from)?;
    }
    Ok(out)
}
