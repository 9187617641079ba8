//! Source nodes: scene renders and caller-supplied textures.

use crate::backend::{DrawCall, SceneDraw, SceneId, TextureHandle};
use crate::camera::Camera;
use crate::error::CompositorError;
use crate::render_graph::{RenderContext, RenderNode};

/// Render node drawing a whole scene through the backend.
///
/// Scene nodes take no inputs. When they render into pooled outputs, color
/// and depth are always cleared first; as terminal nodes they only clear when
/// [`with_final_clear`](Self::with_final_clear) asks for it.
///
/// # Example
///
/// ```ignore
/// compositor.add_node(
///     NodeDesc::new("scene")
///         .output(OutputPin::new("color"))
///         .output(OutputPin::new("depth").attachment(Attachment::Depth)),
///     SceneNode::new(scene, Camera::new().at(0.0, 2.0, 8.0).looking_at(0.0, 0.0, 0.0)),
/// );
/// ```
pub struct SceneNode {
    pub scene: SceneId,
    pub camera: Camera,
    /// Let the backend update scene transforms before drawing.
    pub update_scene: bool,
    /// Render a depth-only pass first.
    pub pre_z: bool,
    clear_color: [f32; 4],
    final_clear: Option<[f32; 4]>,
}

impl SceneNode {
    pub fn new(scene: SceneId, camera: Camera) -> Self {
        Self {
            scene,
            camera,
            update_scene: true,
            pre_z: false,
            clear_color: [0.0; 4],
            final_clear: None,
        }
    }

    pub fn with_clear(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_final_clear(mut self, color: [f32; 4]) -> Self {
        self.final_clear = Some(color);
        self
    }

    pub fn with_pre_z(mut self, pre_z: bool) -> Self {
        self.pre_z = pre_z;
        self
    }

    pub fn with_scene_update(mut self, update: bool) -> Self {
        self.update_scene = update;
        self
    }
}

impl RenderNode for SceneNode {
    fn render(&mut self, ctx: &mut RenderContext) -> Result<(), CompositorError> {
        let clear_color = if ctx.terminal {
            self.final_clear
        } else {
            Some(self.clear_color)
        };
        let draw = SceneDraw {
            label: ctx.node_name,
            scene: self.scene,
            camera: &self.camera,
            clear_color,
            update_scene: self.update_scene,
            pre_z: self.pre_z,
        };
        ctx.draw(&DrawCall::Scene(draw))
    }

    fn accepts_input(&self, _pin: &str) -> bool {
        false
    }
}

/// Exposes a caller-owned texture as the output of a node.
///
/// Every output pin of the node resolves to the same texture. The compositor
/// never pools, resizes or disposes it.
pub struct TextureNode {
    texture: TextureHandle,
}

impl TextureNode {
    pub fn new(texture: TextureHandle) -> Self {
        Self { texture }
    }

    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    /// Swaps in another texture; consumers see it from the next pull on.
    pub fn set_texture(&mut self, texture: TextureHandle) {
        self.texture = texture;
    }
}

impl RenderNode for TextureNode {
    fn render(&mut self, _ctx: &mut RenderContext) -> Result<(), CompositorError> {
        Ok(())
    }

    fn accepts_input(&self, _pin: &str) -> bool {
        false
    }

    fn provided_output(&self, _pin: &str) -> Option<TextureHandle> {
        Some(self.texture)
    }
}
