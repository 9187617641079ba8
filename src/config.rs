use serde::Deserialize;

use crate::texture_pool::DEFAULT_TEXTURE_LIMIT;

/// Compositor-wide settings.
///
/// # Example
///
/// ```
/// use pinwheel::CompositorConfig;
///
/// let config = CompositorConfig::new().max_textures(64);
/// assert_eq!(config.max_textures, 64);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Upper bound on live pooled textures before allocation fails.
    pub max_textures: usize,
    /// Clear the blank texture handed to the first cyclic read of a pin.
    pub clear_blank_textures: bool,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_textures: DEFAULT_TEXTURE_LIMIT,
            clear_blank_textures: true,
        }
    }
}

impl CompositorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_textures(mut self, max_textures: usize) -> Self {
        self.max_textures = max_textures;
        self
    }

    pub fn clear_blank_textures(mut self, clear: bool) -> Self {
        self.clear_blank_textures = clear;
        self
    }
}
