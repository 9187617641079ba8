//! Texture pool: recycle GPU textures to avoid create/destroy churn.
//!
//! Textures are bucketed by a [`PoolKey`], the normalized form of their
//! parameters. A texture handed out by [`TexturePool::get`] is checked out
//! until it comes back through [`TexturePool::put`]; from then on any request
//! that normalizes to the same key may receive it.
//!
//! The pool owns every texture it ever allocated, idle or not. Only
//! [`TexturePool::clear`] (and [`TexturePool::evict`] for idle ones) gives the
//! GPU memory back.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::backend::{RenderBackend, TextureHandle};
use crate::error::CompositorError;
use crate::texture::TextureParameters;

/// Default ceiling on live pooled textures.
pub const DEFAULT_TEXTURE_LIMIT: usize = 1000;

/// Canonical, hashable fingerprint of a texture request.
///
/// Built only through normalization, so requests that differ in fields the
/// hardware would override anyway land in the same bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey(TextureParameters);

impl PoolKey {
    pub fn new(params: &TextureParameters) -> Self {
        Self(params.normalized())
    }

    /// The normalized parameters behind this key.
    pub fn parameters(&self) -> &TextureParameters {
        &self.0
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A pool of GPU textures keyed by their normalized parameters.
pub struct TexturePool {
    idle: HashMap<PoolKey, Vec<TextureHandle>>,
    allocated: HashMap<TextureHandle, PoolKey>,
    checked_out: HashSet<TextureHandle>,
    limit: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_TEXTURE_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            idle: HashMap::new(),
            allocated: HashMap::new(),
            checked_out: HashSet::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    /// Check out a texture matching `params`, reusing an idle one if possible.
    ///
    /// Nothing is registered unless the backend allocation succeeds, so a
    /// failed call leaves the pool exactly as it was.
    pub fn get(
        &mut self,
        params: &TextureParameters,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureHandle, CompositorError> {
        let key = PoolKey::new(params);

        if let Some(texture) = self.idle.get_mut(&key).and_then(Vec::pop) {
            log::trace!("texture pool: reuse {:?} for {}", texture, key);
            self.checked_out.insert(texture);
            return Ok(texture);
        }

        if self.allocated.len() >= self.limit {
            return Err(CompositorError::PoolExhausted { limit: self.limit });
        }

        let texture = backend.create_texture(key.parameters())?;
        log::debug!("texture pool: allocated {:?} for {}", texture, key);
        self.allocated.insert(texture, key);
        self.checked_out.insert(texture);
        Ok(texture)
    }

    /// Return a checked-out texture so later requests can reuse it.
    ///
    /// Releasing a texture twice, or one this pool never allocated, is
    /// reported and ignored.
    pub fn put(&mut self, texture: TextureHandle) {
        if !self.checked_out.remove(&texture) {
            log::warn!(
                "texture pool: {:?} released while not checked out, ignoring",
                texture
            );
            return;
        }
        if let Some(key) = self.allocated.get(&texture) {
            self.idle.entry(*key).or_default().push(texture);
        }
    }

    /// Dispose a texture if it is currently idle. Returns whether it was.
    pub fn evict(&mut self, texture: TextureHandle, backend: &mut dyn RenderBackend) -> bool {
        let Some(key) = self.allocated.get(&texture).copied() else {
            return false;
        };
        let Some(bucket) = self.idle.get_mut(&key) else {
            return false;
        };
        let Some(position) = bucket.iter().position(|idle| *idle == texture) else {
            return false;
        };

        bucket.swap_remove(position);
        if bucket.is_empty() {
            self.idle.remove(&key);
        }
        self.allocated.remove(&texture);
        backend.dispose_texture(texture);
        log::debug!("texture pool: evicted {:?}", texture);
        true
    }

    /// Dispose every texture this pool allocated, idle or checked out.
    pub fn clear(&mut self, backend: &mut dyn RenderBackend) {
        for texture in self.allocated.keys() {
            backend.dispose_texture(*texture);
        }
        log::debug!("texture pool: cleared {} textures", self.allocated.len());
        self.idle.clear();
        self.allocated.clear();
        self.checked_out.clear();
    }

    pub fn parameters(&self, texture: TextureHandle) -> Option<&TextureParameters> {
        self.allocated.get(&texture).map(PoolKey::parameters)
    }

    pub fn is_idle(&self, texture: TextureHandle) -> bool {
        self.allocated.contains_key(&texture) && !self.checked_out.contains(&texture)
    }

    pub fn is_checked_out(&self, texture: TextureHandle) -> bool {
        self.checked_out.contains(&texture)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.checked_out.len()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
