//! `.zattrs` / `.zarray` document builders and the `dtype`
//! encoding shared by every array kind.

use serde_json::{json, Value};
use zarr_model::{Pixels, RenderingModel};
use zarr_shape::DataShape;

/// `dtype` first byte is `|` for single-byte samples (endianness is
/// meaningless), else `<`/`>` by endianness; second byte is the sample
/// kind; third is the byte width.
pub fn dtype_string(byte_width: u8, is_signed: bool, is_float: bool, little_endian: bool) -> String {
    let order = if byte_width == 1 {
        '|'
    } else if little_endian {
        '<'
    } else {
        '>'
    };
    let kind = if is_float {
        'f'
    } else if is_signed {
        'i'
    } else {
        'u'
    };
    format!("{order}{kind}{byte_width}")
}

pub fn build_zarray(shape: &DataShape, dtype: &str, zlib_level: u32) -> Value {
    json!({
        "zarr_format": 2,
        "order": "C",
        "shape": shape.shape(),
        "chunks": shape.chunks(),
        "fill_value": 0,
        "dtype": dtype,
        "filters": Value::Null,
        "compressor": { "id": "zlib", "level": zlib_level },
    })
}

/// Builds the image root's `.zattrs`: `multiscales` always present,
/// `omero` present only when the image has a selected rendering settings
/// record.
pub fn build_zattrs(pixels: &Pixels, resolution_levels: usize) -> Value {
    let datasets: Vec<Value> = (0..resolution_levels)
        .map(|r| json!({ "path": r.to_string() }))
        .collect();

    let mut root = json!({
        "multiscales": [{
            "version": "0.1",
            "name": "default",
            "datasets": datasets,
        }],
    });

    if let Some(settings) = pixels.selected_rendering_settings() {
        let model = match settings.model {
            RenderingModel::Color => "color",
            RenderingModel::Greyscale => "greyscale",
        };
        let mut omero = json!({
            "id": pixels.image_id,
            "name": pixels.name,
            "rdefs": {
                "defaultZ": settings.default_z,
                "defaultT": settings.default_t,
                "model": model,
            },
        });

        if settings.channel_bindings.len() == pixels.channels.len() {
            let channels: Vec<Value> = pixels
                .channels
                .iter()
                .zip(settings.channel_bindings.iter())
                .map(|(channel, binding)| {
                    let mut window = json!({
                        "start": binding.window.start,
                        "end": binding.window.end,
                    });
                    if let Some(stats) = &channel.stats {
                        window["min"] = json!(stats.min);
                        window["max"] = json!(stats.max);
                    }
                    let mut entry = json!({
                        "active": binding.active,
                        "coefficient": binding.coefficient,
                        "family": binding.family,
                        "inverted": binding.inverted,
                        "color": binding.color.to_hex(),
                        "window": window,
                    });
                    if let Some(name) = &channel.name {
                        entry["label"] = json!(name);
                    }
                    entry
                })
                .collect();
            omero["channels"] = json!(channels);
        }

        root["omero"] = omero;
    }

    root
}
