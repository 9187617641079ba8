//! The draw contract every node variant implements.

use crate::backend::{TextureHandle, UniformValue};
use crate::error::CompositorError;
use crate::render_graph::RenderContext;

/// The part of a node that actually draws.
///
/// The compositor owns the wiring, texture lifetimes and the shared frame
/// buffer. By the time [`render`](Self::render) runs, every input pin has been
/// resolved to a texture (or `None` when disconnected), every output texture is
/// attached, and `ctx.target` points at the right place.
///
/// # Implementing Custom Nodes
///
/// ```ignore
/// struct Fill;
///
/// impl RenderNode for Fill {
///     fn render(&mut self, ctx: &mut RenderContext) -> Result<(), CompositorError> {
///         let draw = FullscreenDraw { label: ctx.node_name, shader: FILL_WGSL, /* ... */ };
///         ctx.draw(&DrawCall::Fullscreen(draw))
///     }
/// }
/// ```
pub trait RenderNode {
    /// Issues this node's draw calls.
    fn render(&mut self, ctx: &mut RenderContext) -> Result<(), CompositorError>;

    /// Whether the node has a use for input `pin`.
    ///
    /// Inputs that are not accepted are reported during re-linking and left
    /// disconnected. The default accepts everything.
    fn accepts_input(&self, _pin: &str) -> bool {
        true
    }

    /// Called during re-linking for every input that got connected.
    fn enable_input(&mut self, _pin: &str) {}

    /// Called at the start of re-linking, before any input is connected.
    fn disable_inputs(&mut self) {}

    /// A caller-owned texture that backs output `pin` instead of a pooled one.
    ///
    /// Provided outputs are never allocated, released or resized by the
    /// compositor.
    fn provided_output(&self, _pin: &str) -> Option<TextureHandle> {
        None
    }

    fn set_parameter(&mut self, _name: &str, _value: UniformValue) {}
}
