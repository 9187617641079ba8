//! Texture parameter sets shared by the pool, the graph and the backends.
//!
//! [`TextureParameters`] is the complete description of a pooled image. Every
//! field takes part in the pool key, so two requests that normalize to the
//! same parameters are interchangeable.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Channel layout of a texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TextureFormat {
    Rgba,
    Rgb,
    Alpha,
    Luminance,
    LuminanceAlpha,
    DepthComponent,
    DepthStencil,
}

impl TextureFormat {
    pub fn is_depth(self) -> bool {
        matches!(self, Self::DepthComponent | Self::DepthStencil)
    }
}

/// Storage type of each channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelType {
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    HalfFloat,
    Float,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterMode {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl FilterMode {
    pub fn is_mipmapped(self) -> bool {
        !matches!(self, Self::Nearest | Self::Linear)
    }

    /// The same filter with the mip lookup removed.
    pub fn without_mipmap(self) -> Self {
        match self {
            Self::NearestMipmapNearest | Self::NearestMipmapLinear => Self::Nearest,
            Self::LinearMipmapNearest | Self::LinearMipmapLinear => Self::Linear,
            other => other,
        }
    }
}

/// Where an output texture is attached on a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attachment {
    Color(u8),
    Depth,
    DepthStencil,
}

impl Default for Attachment {
    fn default() -> Self {
        Self::Color(0)
    }
}

impl Attachment {
    /// Parses the GL-style attachment names used in descriptors,
    /// e.g. `COLOR_ATTACHMENT1` or `DEPTH_ATTACHMENT`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DEPTH_ATTACHMENT" => Some(Self::Depth),
            "DEPTH_STENCIL_ATTACHMENT" => Some(Self::DepthStencil),
            other => {
                let index: u8 = other.strip_prefix("COLOR_ATTACHMENT")?.parse().ok()?;
                (index < 8).then_some(Self::Color(index))
            }
        }
    }
}

/// Full parameter set of a pooled texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureParameters {
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    pub format: TextureFormat,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub use_mipmap: bool,
    pub anisotropic: u32,
    pub flip_y: bool,
    pub unpack_alignment: u32,
    pub premultiply_alpha: bool,
}

impl Default for TextureParameters {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
            pixel_type: PixelType::UnsignedByte,
            format: TextureFormat::Rgba,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            min_filter: FilterMode::LinearMipmapLinear,
            mag_filter: FilterMode::Linear,
            use_mipmap: true,
            anisotropic: 1,
            flip_y: true,
            unpack_alignment: 4,
            premultiply_alpha: false,
        }
    }
}

impl TextureParameters {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Self::default()
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    pub fn wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap_s = wrap;
        self.wrap_t = wrap;
        self
    }

    pub fn filter(mut self, min: FilterMode, mag: FilterMode) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self
    }

    pub fn mipmap(mut self, use_mipmap: bool) -> Self {
        self.use_mipmap = use_mipmap;
        self
    }

    pub fn anisotropic(mut self, anisotropic: u32) -> Self {
        self.anisotropic = anisotropic;
        self
    }

    pub fn is_power_of_two(&self) -> bool {
        is_power_of_two(self.width) && is_power_of_two(self.height)
    }

    /// Applies the hardware fallback rules.
    ///
    /// Depth textures never carry mipmaps. Textures that are not power of two,
    /// or that have no mip chain, cannot sample with a mipmapped min filter.
    /// Non-power-of-two textures can only clamp.
    pub fn normalized(mut self) -> Self {
        let pot = self.is_power_of_two();

        if self.format.is_depth() {
            self.use_mipmap = false;
        }
        if !pot || !self.use_mipmap {
            self.min_filter = self.min_filter.without_mipmap();
        }
        if !pot {
            self.wrap_s = WrapMode::ClampToEdge;
            self.wrap_t = WrapMode::ClampToEdge;
        }
        self
    }
}

impl fmt::Display for TextureParameters {
    /// Canonical text form, fields in a fixed order.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}:{:?}:{:?}:{:?}:{:?}:{:?}:{:?}:{}:{}:{}:{}:{}",
            self.width,
            self.height,
            self.pixel_type,
            self.format,
            self.wrap_s,
            self.wrap_t,
            self.min_filter,
            self.mag_filter,
            self.use_mipmap,
            self.anisotropic,
            self.flip_y,
            self.unpack_alignment,
            self.premultiply_alpha,
        )
    }
}

fn is_power_of_two(value: u32) -> bool {
    value & value.wrapping_sub(1) == 0
}
