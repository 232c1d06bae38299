#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

/// Raw bytes returned by a single upstream tile read, with the endianness the
/// upstream reported for that tile.
#[derive(Clone, Debug)]
pub struct Tile {
    pub data: Vec<u8>,
    pub endianness: Endianness,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
}

#[derive(Clone, Debug, Default)]
pub struct ChannelMetadata {
    pub name: Option<String>,
    pub stats: Option<ChannelStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderingModel {
    Color,
    Greyscale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    /// Uppercase, zero-padded six-hex form, e.g. `"FF0000"`.
    pub fn to_hex(self) -> String {
        format!("{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelWindow {
    pub start: f64,
    pub end: f64,
}

#[derive(Clone, Debug)]
pub struct ChannelBinding {
    pub active: bool,
    pub coefficient: f64,
    pub family: String,
    pub inverted: bool,
    pub color: RgbColor,
    pub window: ChannelWindow,
}

#[derive(Clone, Debug)]
pub struct RenderingSettings {
    pub owner_id: i64,
    pub default_z: u32,
    pub default_t: u32,
    pub model: RenderingModel,
    pub channel_bindings: Vec<ChannelBinding>,
}

/// Per-image metadata as returned by `MetadataSource::get_pixels`.
#[derive(Clone, Debug)]
pub struct Pixels {
    pub image_id: i64,
    pub owner_id: i64,
    pub name: Option<String>,
    pub channels: Vec<ChannelMetadata>,
    /// Every rendering settings record known for this image, in upstream order.
    pub rendering_settings: Vec<RenderingSettings>,
}

impl Pixels {
    /// The rendering settings to render into `.zattrs`: the first one owned
    /// by the image owner, else the first one, else none.
    pub fn selected_rendering_settings(&self) -> Option<&RenderingSettings> {
        self.rendering_settings
            .iter()
            .find(|settings| settings.owner_id == self.owner_id)
            .or_else(|| self.rendering_settings.first())
    }
}
