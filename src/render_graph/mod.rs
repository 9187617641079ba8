//! Pull-based render graph with pooled intermediate textures.
//!
//! Nodes declare named input pins (references to other nodes' outputs) and
//! named output pins (pooled textures). The [`Compositor`] links them once per
//! topology change and then renders frame by frame, starting from the
//! terminal nodes and pulling each input on demand.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  color  ┌─────────────┐  color  ┌─────────────┐
//! │  SceneNode  │────────▶│ FilterNode  │────────▶│ FilterNode  │───▶ final target
//! │  "scene"    │         │  "blurH"    │         │  "blurV"    │     (terminal)
//! └─────────────┘         └─────────────┘         └─────────────┘
//!        │                       │
//!        ▼                       ▼
//!   pooled texture          pooled texture      (back to the pool once read)
//! ```
//!
//! # Node Types
//!
//! - [`FilterNode`]: one full-screen fragment shader (blur, tone mapping, FXAA)
//! - [`SceneNode`]: a full scene render through the backend
//! - [`TextureNode`]: a caller-owned texture exposed as an output
//!
//! Anything implementing [`RenderNode`] can be added as well.
//!
//! # Cycles
//!
//! A node may read its own consumers' outputs. When a pull reaches a node
//! whose render is still in progress, the reader gets that node's texture from
//! the previous frame. Mark such pins `keep_last_frame` so there is one.

mod compositor;
mod effect_nodes;
mod graph;
mod node_state;
mod pin;
mod post_process_nodes;
mod render_node;
mod render_target;

pub use compositor::Compositor;
pub use effect_nodes::{SceneNode, TextureNode};
pub use graph::{Graph, Link, NodeId, NodeLinks};
pub use node_state::NodeState;
pub use pin::{Axis, NodeDesc, NodeRef, OutputPin, PinRef, SizeParam};
pub use post_process_nodes::FilterNode;
pub use render_node::RenderNode;
pub use render_target::{RenderContext, SharedFrameBuffer};
