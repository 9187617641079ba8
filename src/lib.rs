//! # Pinwheel
//!
//! **A pin-wired render graph for multi-pass GPU post-processing.**
//!
//! Build a graph of nodes, wire their output pins to each other's inputs, and
//! let the [`Compositor`] render it frame by frame. Intermediate textures come
//! from a [`TexturePool`] and go back to it as soon as their last reader is
//! done, so a long effect chain only keeps a handful of images alive.
//!
//! ## Quick Start
//!
//! ```no_run
//! use pinwheel::*;
//!
//! # fn main() -> Result<(), CompositorError> {
//! let gpu = GpuContext::headless()?;
//! let mut backend = WgpuBackend::new(gpu, 1280, 720);
//!
//! let mut compositor = Compositor::new();
//! let source = backend.create_texture_with_data(&TextureParameters::new(1, 1), &[255, 0, 0, 255])?;
//! compositor.add_node(
//!     NodeDesc::new("source").output(OutputPin::new("color")),
//!     TextureNode::new(source),
//! );
//! compositor.add_node(
//!     NodeDesc::new("blur").input("texture", "source").output(OutputPin::new("color").scale(0.5)),
//!     FilterNode::new(BLUR_WGSL).with_parameter("blurSize", UniformValue::Float(2.0)),
//! );
//! compositor.add_node(NodeDesc::new("out").input("texture", "blur"), FilterNode::new(COPY_WGSL));
//!
//! compositor.render(&mut backend, RenderTarget::Default)?;
//! # Ok(())
//! # }
//! # const BLUR_WGSL: &str = "";
//! # const COPY_WGSL: &str = "";
//! ```
//!
//! ## Pieces
//!
//! - [`RenderBackend`] is everything the compositor needs from a GPU.
//!   [`WgpuBackend`] renders with wgpu; [`RecordingBackend`] records calls for tests.
//! - [`NodeDesc`] and [`OutputPin`] describe the wiring; any [`RenderNode`] draws.
//! - [`load_compositor`] builds a whole graph from a JSON descriptor.

mod backend;
mod camera;
mod config;
mod descriptor;
mod error;
mod expr;
mod gpu;
mod render_graph;
mod texture;
mod texture_pool;
mod wgpu_backend;

pub use backend::{
    BackendEvent, DrawCall, DrawKind, DrawRecord, FrameBufferHandle, FullscreenDraw,
    RecordingBackend, RenderBackend, RenderTarget, SceneDraw, SceneId, TextureHandle,
    UniformValue, Viewport,
};
pub use camera::Camera;
pub use config::CompositorConfig;
pub use descriptor::{LoadOptions, LoadedCompositor, load_compositor, load_compositor_file};
pub use error::{BackendError, CompositorError};
pub use expr::{ExprVars, Expression};
pub use gpu::GpuContext;
pub use render_graph::{
    Axis, Compositor, FilterNode, Graph, Link, NodeDesc, NodeId, NodeLinks, NodeRef, NodeState,
    OutputPin, PinRef, RenderContext, RenderNode, SceneNode, SharedFrameBuffer, SizeParam,
    TextureNode,
};
pub use texture::{Attachment, FilterMode, PixelType, TextureFormat, TextureParameters, WrapMode};
pub use texture_pool::{DEFAULT_TEXTURE_LIMIT, PoolKey, TexturePool};
pub use wgpu_backend::{DEFAULT_TARGET_FORMAT, SceneRenderer, SceneTarget, WgpuBackend};

// Re-export glam math types for convenience
pub use glam::{Mat4, Vec3};
