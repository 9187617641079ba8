//! Full-screen shader nodes.

use std::collections::{BTreeMap, BTreeSet};

use crate::backend::{DrawCall, FullscreenDraw, UniformValue};
use crate::error::CompositorError;
use crate::expr::{ExprVars, Expression};
use crate::render_graph::{RenderContext, RenderNode};

/// Render node running one full-screen fragment shader.
///
/// Input pins become texture slots of the same name. Every connected input
/// also gets a `<PIN>_ENABLED` define, so shaders can branch on inputs that
/// may be left disconnected.
///
/// # Parameters
///
/// Uniforms are either fixed values set with [`set_parameter`](Self::set_parameter)
/// or expressions over the viewport ([`set_expression`](Self::set_expression)),
/// which are re-evaluated before every render.
///
/// # Example
///
/// ```ignore
/// let blur = FilterNode::new(BLUR_WGSL)
///     .with_parameter("blurSize", UniformValue::Float(2.0))
///     .with_expression("textureSize", Expression::parse("[width, height]")?)
///     .with_define("RADIUS", "4");
///
/// compositor.add_node(
///     NodeDesc::new("blurH").input("texture", "scene").output(OutputPin::new("color")),
///     blur,
/// );
/// ```
pub struct FilterNode {
    shader: String,
    uniforms: BTreeMap<String, UniformValue>,
    expressions: BTreeMap<String, Expression>,
    defines: BTreeMap<String, String>,
    /// Texture slots the shader declares. `None` accepts any input.
    slots: Option<BTreeSet<String>>,
    enabled: BTreeSet<String>,
    /// Clear color for the target. `None` means load existing contents.
    pub clear_color: Option<[f32; 4]>,
}

impl FilterNode {
    /// Creates a filter that clears its target to transparent black.
    pub fn new(shader: impl Into<String>) -> Self {
        Self {
            shader: shader.into(),
            uniforms: BTreeMap::new(),
            expressions: BTreeMap::new(),
            defines: BTreeMap::new(),
            slots: None,
            enabled: BTreeSet::new(),
            clear_color: Some([0.0; 4]),
        }
    }

    /// Restricts the inputs this filter accepts to the given texture slots.
    pub fn with_texture_slots<I, S>(mut self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.slots = Some(slots.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_parameter(mut self, name: &str, value: UniformValue) -> Self {
        self.set_parameter(name, value);
        self
    }

    pub fn with_expression(mut self, name: &str, expr: Expression) -> Self {
        self.set_expression(name, expr);
        self
    }

    pub fn with_define(mut self, symbol: &str, value: &str) -> Self {
        self.define(symbol, value);
        self
    }

    pub fn with_clear(mut self, color: [f32; 4]) -> Self {
        self.clear_color = Some(color);
        self
    }

    pub fn no_clear(mut self) -> Self {
        self.clear_color = None;
        self
    }

    pub fn shader(&self) -> &str {
        &self.shader
    }

    /// Binds a uniform to an expression, replacing any fixed value.
    pub fn set_expression(&mut self, name: &str, expr: Expression) {
        self.uniforms.remove(name);
        self.expressions.insert(name.to_string(), expr);
    }

    pub fn parameter(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }

    pub fn define(&mut self, symbol: &str, value: &str) {
        self.defines.insert(symbol.to_string(), value.to_string());
    }

    pub fn undefine(&mut self, symbol: &str) {
        self.defines.remove(symbol);
    }

    pub fn is_input_enabled(&self, pin: &str) -> bool {
        self.enabled.contains(pin)
    }

    fn resolved_uniforms(&self, vars: &ExprVars) -> BTreeMap<String, UniformValue> {
        let mut uniforms = self.uniforms.clone();
        for (name, expr) in &self.expressions {
            if let Some(value) = expr.eval_uniform(vars) {
                uniforms.insert(name.clone(), value);
            }
        }
        uniforms
    }

    fn resolved_defines(&self) -> BTreeMap<String, String> {
        let mut defines = self.defines.clone();
        for pin in &self.enabled {
            defines.insert(format!("{}_ENABLED", pin.to_uppercase()), "1".to_string());
        }
        defines
    }
}

impl RenderNode for FilterNode {
    fn render(&mut self, ctx: &mut RenderContext) -> Result<(), CompositorError> {
        let uniforms = self.resolved_uniforms(&ExprVars::from(ctx.viewport));
        let defines = self.resolved_defines();
        let draw = FullscreenDraw {
            label: ctx.node_name,
            shader: &self.shader,
            textures: ctx.inputs,
            uniforms: &uniforms,
            defines: &defines,
            clear_color: self.clear_color,
        };
        ctx.draw(&DrawCall::Fullscreen(draw))
    }

    fn accepts_input(&self, pin: &str) -> bool {
        self.slots.as_ref().is_none_or(|slots| slots.contains(pin))
    }

    fn enable_input(&mut self, pin: &str) {
        self.enabled.insert(pin.to_string());
    }

    fn disable_inputs(&mut self) {
        self.enabled.clear();
    }

    fn set_parameter(&mut self, name: &str, value: UniformValue) {
        self.expressions.remove(name);
        self.uniforms.insert(name.to_string(), value);
    }
}
