//! Validated, immutable configuration bundle. The mechanism that
//! assembles the raw key/value map — a `.properties` file, environment
//! variables, whatever an operator prefers — is explicitly out of scope; this
//! crate only validates and holds the result.

use std::collections::HashMap;

use zarr_model::ServiceError;
use zarr_shape::Dimension;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderLayout {
    Nested,
    Flattened,
    None,
}

impl FolderLayout {
    fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "nested" => Ok(FolderLayout::Nested),
            "flattened" => Ok(FolderLayout::Flattened),
            "none" => Ok(FolderLayout::None),
            other => Err(ServiceError::config(format!(
                "folder.layout must be one of nested, flattened, none; got {other:?}"
            ))),
        }
    }
}

/// `mask.overlap.value`: the pixel value written into the labeled mask array
/// where two or more ROIs cover the same pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapValue {
    Fixed(u64),
    Highest,
    Lowest,
    Unset,
}

impl OverlapValue {
    fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "HIGHEST" => Ok(OverlapValue::Highest),
            "LOWEST" => Ok(OverlapValue::Lowest),
            "null" | "" => Ok(OverlapValue::Unset),
            other => other
                .parse::<u64>()
                .map(OverlapValue::Fixed)
                .map_err(|_| {
                    ServiceError::config(format!(
                        "mask.overlap.value must be an integer, HIGHEST, LOWEST, or null; got {other:?}"
                    ))
                }),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub buffer_cache_size: usize,
    pub chunk_size_min: u64,
    pub chunk_size_adjust: Vec<Dimension>,
    pub compress_zlib_level: u32,
    pub folder_layout: FolderLayout,
    pub mask_cache_size_mb: u64,
    pub mask_split_enable: bool,
    pub mask_overlap_color: Option<u32>,
    pub mask_overlap_value: OverlapValue,
    pub net_path_image: String,
    pub net_port: u16,
}

fn get<'a>(map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    map.get(key).map(String::as_str)
}

fn parse_or<T: std::str::FromStr>(
    map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ServiceError> {
    match get(map, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::config(format!("{key} has an invalid value: {raw:?}"))),
    }
}

impl Config {
    /// Validates every key from §4.1's table. Unknown keys are ignored;
    /// missing keys fall back to their documented default.
    pub fn from_map(map: &HashMap<String, String>) -> Result<Config, ServiceError> {
        let buffer_cache_size: usize = parse_or(map, "buffer-cache.size", 16)?;
        if buffer_cache_size < 1 {
            return Err(ServiceError::config("buffer-cache.size must be >= 1"));
        }

        let chunk_size_min: u64 = parse_or(map, "chunk.size.min", 1_048_576)?;
        if chunk_size_min < 1 {
            return Err(ServiceError::config("chunk.size.min must be >= 1"));
        }

        let chunk_size_adjust = match get(map, "chunk.size.adjust") {
            None => zarr_shape::DEFAULT_ADJUST_ORDER.to_vec(),
            Some(raw) => parse_adjust_order(raw)?,
        };

        let compress_zlib_level: u32 = parse_or(map, "compress.zlib.level", 6)?;
        if compress_zlib_level > 9 {
            return Err(ServiceError::config("compress.zlib.level must be 0..=9"));
        }

        let folder_layout = match get(map, "folder.layout") {
            None => FolderLayout::Flattened,
            Some(raw) => FolderLayout::parse(raw)?,
        };

        let mask_cache_size_mb: u64 = parse_or(map, "mask-cache.size", 250)?;

        let mask_split_enable: bool = parse_or(map, "mask.split.enable", false)?;

        let mask_overlap_color: Option<u32> = match get(map, "mask.overlap.color") {
            None | Some("null") | Some("") => None,
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| ServiceError::config(format!("mask.overlap.color is not an integer: {raw:?}")))?,
            ),
        };

        let mask_overlap_value = match get(map, "mask.overlap.value") {
            None => OverlapValue::Highest,
            Some(raw) => OverlapValue::parse(raw)?,
        };

        let net_path_image = get(map, "net.path.image")
            .map(str::to_owned)
            .unwrap_or_else(|| "/image/{image}.zarr/".to_owned());
        if !net_path_image.contains("{image}") {
            return Err(ServiceError::config(
                "net.path.image must contain the {image} placeholder",
            ));
        }

        let net_port: u16 = parse_or(map, "net.port", 8080)?;

        Ok(Config {
            buffer_cache_size,
            chunk_size_min,
            chunk_size_adjust,
            compress_zlib_level,
            folder_layout,
            mask_cache_size_mb,
            mask_split_enable,
            mask_overlap_color,
            mask_overlap_value,
            net_path_image,
            net_port,
        })
    }

    /// Reads the same keys from the process environment (upper-cased,
    /// dots/dashes replaced with underscores) and falls back to `from_map`'s
    /// defaults for anything unset. This is the whole of the bootstrap
    /// mechanism this crate provides; a richer loader (files, secrets
    /// managers, …) is out of scope.
    pub fn from_env() -> Result<Config, ServiceError> {
        let mut map = HashMap::new();
        for key in [
            "buffer-cache.size",
            "chunk.size.min",
            "chunk.size.adjust",
            "compress.zlib.level",
            "folder.layout",
            "mask-cache.size",
            "mask.split.enable",
            "mask.overlap.color",
            "mask.overlap.value",
            "net.path.image",
            "net.port",
        ] {
            let env_key = key.to_uppercase().replace(['.', '-'], "_");
            if let Ok(value) = std::env::var(&env_key) {
                map.insert(key.to_owned(), value);
            }
        }
        Config::from_map(&map)
    }
}

fn parse_adjust_order(raw: &str) -> Result<Vec<Dimension>, ServiceError> {
    let mut seen = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        let dim = Dimension::parse(token).ok_or_else(|| {
            ServiceError::config(format!("chunk.size.adjust has an unknown dimension: {token:?}"))
        })?;
        if seen.contains(&dim) {
            return Err(ServiceError::config(format!(
                "chunk.size.adjust must not repeat a dimension: {token:?}"
            )));
        }
        seen.push(dim);
    }
    if seen.is_empty() {
        return Err(ServiceError::config("chunk.size.adjust must not be empty"));
    }
    Ok(seen)
}

#[cfg(test)]
mod test {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_match_the_documented_table() {
        let config = Config::from_map(&HashMap::new()).unwrap();
        assert_eq!(config.buffer_cache_size, 16);
        assert_eq!(config.chunk_size_min, 1_048_576);
        assert_eq!(config.chunk_size_adjust, zarr_shape::DEFAULT_ADJUST_ORDER.to_vec());
        assert_eq!(config.compress_zlib_level, 6);
        assert_eq!(config.folder_layout, FolderLayout::Flattened);
        assert_eq!(config.mask_cache_size_mb, 250);
        assert!(!config.mask_split_enable);
        assert_eq!(config.mask_overlap_color, None);
        assert_eq!(config.mask_overlap_value, OverlapValue::Highest);
        assert_eq!(config.net_path_image, "/image/{image}.zarr/");
        assert_eq!(config.net_port, 8080);
    }

    #[test]
    fn rejects_zero_buffer_cache_size() {
        let err = Config::from_map(&map(&[("buffer-cache.size", "0")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn rejects_zlib_level_above_nine() {
        let err = Config::from_map(&map(&[("compress.zlib.level", "10")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn rejects_unknown_folder_layout() {
        let err = Config::from_map(&map(&[("folder.layout", "weird")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn rejects_repeated_adjust_dimension() {
        let err = Config::from_map(&map(&[("chunk.size.adjust", "X,Y,X")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn parses_custom_adjust_order() {
        let config = Config::from_map(&map(&[("chunk.size.adjust", "Z,X")])).unwrap();
        assert_eq!(config.chunk_size_adjust, vec![Dimension::Z, Dimension::X]);
    }

    #[test]
    fn rejects_image_path_without_placeholder() {
        let err = Config::from_map(&map(&[("net.path.image", "/image/")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn parses_fixed_overlap_value() {
        let config = Config::from_map(&map(&[("mask.overlap.value", "99")])).unwrap();
        assert_eq!(config.mask_overlap_value, OverlapValue::Fixed(99));
    }

    #[test]
    fn rejects_garbage_overlap_value() {
        let err = Config::from_map(&map(&[("mask.overlap.value", "sideways")])).unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }
}
