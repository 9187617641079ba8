//! The render backend contract.
//!
//! The compositor never talks to a graphics API directly. Everything it needs
//! from the GPU goes through [`RenderBackend`]: creating and disposing
//! textures, managing the shared frame buffer, and issuing the draw calls the
//! node variants describe.
//!
//! Two implementations ship with the crate:
//!
//! - [`WgpuBackend`](crate::WgpuBackend) renders with wgpu.
//! - [`RecordingBackend`] keeps everything in memory and records each call,
//!   which makes graphs testable without a GPU.

pub mod recording;

use std::collections::BTreeMap;

use crate::camera::Camera;
use crate::error::BackendError;
use crate::texture::{Attachment, TextureParameters};

pub use recording::{BackendEvent, DrawKind, DrawRecord, RecordingBackend};

/// Opaque handle to a backend texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u64);

impl TextureHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a backend frame buffer (a set of attachments).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameBufferHandle(u64);

impl FrameBufferHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Opaque handle to a scene the backend knows how to traverse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SceneId(u64);

impl SceneId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Size of the final render target, used to resolve dynamic pin sizes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_pixel_ratio: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio: 1.0,
        }
    }
}

/// Where a draw lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RenderTarget {
    /// The backend's default target (the screen, or its offscreen stand-in).
    Default,
    /// An externally supplied or shared frame buffer.
    FrameBuffer(FrameBufferHandle),
}

/// A shader parameter value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Texture(TextureHandle),
}

impl UniformValue {
    /// Builds a float vector value from up to four components.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match *values {
            [x] => Some(Self::Float(x)),
            [x, y] => Some(Self::Vec2([x, y])),
            [x, y, z] => Some(Self::Vec3([x, y, z])),
            [x, y, z, w] => Some(Self::Vec4([x, y, z, w])),
            _ => None,
        }
    }

    /// The value widened to four floats. Textures have no numeric value.
    pub fn as_vec4(&self) -> Option<[f32; 4]> {
        match *self {
            Self::Float(x) => Some([x, 0.0, 0.0, 0.0]),
            Self::Int(x) => Some([x as f32, 0.0, 0.0, 0.0]),
            Self::Vec2([x, y]) => Some([x, y, 0.0, 0.0]),
            Self::Vec3([x, y, z]) => Some([x, y, z, 0.0]),
            Self::Vec4(v) => Some(v),
            Self::Texture(_) => None,
        }
    }
}

/// A full-screen shader pass.
#[derive(Debug)]
pub struct FullscreenDraw<'a> {
    pub label: &'a str,
    /// Fragment shader source. Its interpretation is up to the backend.
    pub shader: &'a str,
    /// Every texture slot the shader declares; `None` marks a disconnected slot.
    pub textures: &'a BTreeMap<String, Option<TextureHandle>>,
    pub uniforms: &'a BTreeMap<String, UniformValue>,
    pub defines: &'a BTreeMap<String, String>,
    pub clear_color: Option<[f32; 4]>,
}

/// A full scene render, traversed by the backend.
#[derive(Debug)]
pub struct SceneDraw<'a> {
    pub label: &'a str,
    pub scene: SceneId,
    pub camera: &'a Camera,
    pub clear_color: Option<[f32; 4]>,
    pub update_scene: bool,
    pub pre_z: bool,
}

#[derive(Debug)]
pub enum DrawCall<'a> {
    Fullscreen(FullscreenDraw<'a>),
    Scene(SceneDraw<'a>),
}

impl DrawCall<'_> {
    pub fn label(&self) -> &str {
        match self {
            Self::Fullscreen(draw) => draw.label,
            Self::Scene(draw) => draw.label,
        }
    }
}

/// GPU services consumed by the compositor.
///
/// All calls happen on one thread, in frame order. A frame buffer bound with
/// [`bind_frame_buffer`](Self::bind_frame_buffer) stays bound until it is
/// explicitly unbound.
pub trait RenderBackend {
    fn viewport(&self) -> Viewport;

    /// Allocates a texture. Freshly created textures are zero-filled.
    fn create_texture(&mut self, params: &TextureParameters) -> Result<TextureHandle, BackendError>;

    /// Allocates a texture and uploads tightly packed RGBA8 pixels into it.
    fn create_texture_with_data(
        &mut self,
        params: &TextureParameters,
        rgba: &[u8],
    ) -> Result<TextureHandle, BackendError>;

    /// Resets a texture's contents to zero (depth to the far plane).
    fn clear_texture(&mut self, texture: TextureHandle) -> Result<(), BackendError>;

    fn dispose_texture(&mut self, texture: TextureHandle);

    fn create_frame_buffer(&mut self) -> Result<FrameBufferHandle, BackendError>;

    fn dispose_frame_buffer(&mut self, frame_buffer: FrameBufferHandle);

    fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> Result<(), BackendError>;

    fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle);

    fn attach(
        &mut self,
        frame_buffer: FrameBufferHandle,
        texture: TextureHandle,
        attachment: Attachment,
    ) -> Result<(), BackendError>;

    /// Removes every attachment from the frame buffer.
    fn detach_all(&mut self, frame_buffer: FrameBufferHandle);

    fn draw(&mut self, call: &DrawCall<'_>, target: RenderTarget) -> Result<(), BackendError>;

    /// Rebuilds the mip chain of a texture after it was rendered to.
    fn generate_mipmaps(&mut self, _texture: TextureHandle) -> Result<(), BackendError> {
        Ok(())
    }
}
