use thiserror::Error;

use crate::backend::{FrameBufferHandle, SceneId, TextureHandle};

/// Failures reported by a [`RenderBackend`](crate::RenderBackend).
///
/// These are the only errors that abort a frame. Configuration problems in the
/// graph itself are logged and never surface here.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("out of GPU memory while allocating {0}")]
    OutOfMemory(String),
    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),
    #[error("unknown frame buffer {0:?}")]
    UnknownFrameBuffer(FrameBufferHandle),
    #[error("unknown scene {0:?}")]
    UnknownScene(SceneId),
    #[error("no default render target is configured")]
    NoDefaultTarget,
    #[error("invalid texture size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("shader compilation failed: {0}")]
    Shader(String),
    #[error("device error: {0}")]
    Device(String),
}

#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("render backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("texture pool exhausted: more than {limit} textures allocated")]
    PoolExhausted { limit: usize },
    #[error("invalid expression '{source_text}': {message}")]
    Expression { source_text: String, message: String },
    #[error("unknown shader source '{0}'")]
    UnknownShader(String),
    #[error("invalid descriptor: {0}")]
    Descriptor(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}
