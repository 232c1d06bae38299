//! Shared data model and upstream trait contracts.
//!
//! This crate has no knowledge of HTTP, Zarr, or bitmask algebra; it only
//! describes the shapes that flow across the `MetadataSource` / `PixelSource`
//! boundary plus the error taxonomy every other crate in the workspace
//! reports through.

mod error;
mod pixels;
mod source;

pub use error::ServiceError;
pub use pixels::{
    ChannelBinding, ChannelMetadata, ChannelStats, ChannelWindow, Endianness, Pixels,
    RenderingModel, RenderingSettings, RgbColor, Tile,
};
pub use source::{MetadataSource, PixelBuffer, PixelSource, PlaneRestriction, RawMask, Rect, RoiRecord};
