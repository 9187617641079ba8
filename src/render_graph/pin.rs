//! Declarative node configuration: input references and output pins.

use std::fmt;
use std::rc::Rc;

use crate::backend::Viewport;
use crate::expr::{ExprVars, Expression};
use crate::render_graph::NodeId;
use crate::texture::{Attachment, TextureParameters};

/// Names the producer of an input.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeRef {
    /// The first node added under this name.
    Name(String),
    Id(NodeId),
}

impl From<&str> for NodeRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for NodeRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        Self::Id(id)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Id(id) => write!(f, "#{}", id.index()),
        }
    }
}

/// Reference to another node's output pin.
///
/// Without an explicit pin, the producer's first declared output is used.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PinRef {
    pub node: NodeRef,
    pub pin: Option<String>,
}

impl PinRef {
    pub fn new(node: impl Into<NodeRef>) -> Self {
        Self {
            node: node.into(),
            pin: None,
        }
    }

    pub fn pin(mut self, pin: impl Into<String>) -> Self {
        self.pin = Some(pin.into());
        self
    }
}

impl From<&str> for PinRef {
    fn from(node: &str) -> Self {
        Self::new(node)
    }
}

impl From<NodeId> for PinRef {
    fn from(node: NodeId) -> Self {
        Self::new(node)
    }
}

impl From<(&str, &str)> for PinRef {
    fn from((node, pin): (&str, &str)) -> Self {
        Self::new(node).pin(pin)
    }
}

impl fmt::Display for PinRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pin {
            Some(pin) => write!(f, "{}.{}", self.node, pin),
            None => write!(f, "{}", self.node),
        }
    }
}

/// Width or height of an output pin.
#[derive(Clone)]
pub enum SizeParam {
    Fixed(u32),
    /// The viewport dimension times `scale`.
    Viewport { scale: f32 },
    /// An expression evaluated against the viewport scaled by `scale`.
    Expr { expr: Expression, scale: f32 },
    Func(Rc<dyn Fn(&Viewport) -> f32>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Width,
    Height,
}

impl SizeParam {
    pub fn viewport() -> Self {
        Self::Viewport { scale: 1.0 }
    }

    pub fn func(f: impl Fn(&Viewport) -> f32 + 'static) -> Self {
        Self::Func(Rc::new(f))
    }

    /// Resolves to a pixel count, rounded up and never below 1.
    pub fn resolve(&self, viewport: &Viewport, axis: Axis) -> u32 {
        let along = |width: f32, height: f32| match axis {
            Axis::Width => width,
            Axis::Height => height,
        };

        let value = match self {
            Self::Fixed(size) => *size as f32,
            Self::Viewport { scale } => {
                along(viewport.width as f32, viewport.height as f32) * scale
            }
            Self::Expr { expr, scale } => {
                let vars = ExprVars {
                    width: viewport.width as f32 * scale,
                    height: viewport.height as f32 * scale,
                    dpr: viewport.device_pixel_ratio,
                };
                expr.eval_scalar(&vars)
            }
            Self::Func(f) => f(viewport),
        };

        if value.is_finite() {
            value.ceil().max(1.0) as u32
        } else {
            1
        }
    }
}

impl Default for SizeParam {
    fn default() -> Self {
        Self::viewport()
    }
}

impl From<u32> for SizeParam {
    fn from(size: u32) -> Self {
        Self::Fixed(size)
    }
}

impl From<Expression> for SizeParam {
    fn from(expr: Expression) -> Self {
        Self::Expr { expr, scale: 1.0 }
    }
}

impl fmt::Debug for SizeParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => f.debug_tuple("Fixed").field(size).finish(),
            Self::Viewport { scale } => f.debug_struct("Viewport").field("scale", scale).finish(),
            Self::Expr { expr, scale } => f
                .debug_struct("Expr")
                .field("expr", &expr.to_string())
                .field("scale", scale)
                .finish(),
            Self::Func(_) => f.write_str("Func(..)"),
        }
    }
}

/// A named output of a node, backed by a pooled texture.
#[derive(Clone, Debug)]
pub struct OutputPin {
    pub name: String,
    pub attachment: Attachment,
    /// Template for the pooled texture. Width and height are overwritten by
    /// the resolved `width` and `height` before every allocation.
    pub parameters: TextureParameters,
    pub width: SizeParam,
    pub height: SizeParam,
    /// Keep this frame's texture alive into the next frame.
    pub keep_last_frame: bool,
    /// Consumers that pull after the node already rendered this frame get the
    /// previous frame's texture. The pull that triggers the render still
    /// reads the fresh one.
    pub output_last_frame: bool,
}

impl OutputPin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attachment: Attachment::default(),
            parameters: TextureParameters::default(),
            width: SizeParam::viewport(),
            height: SizeParam::viewport(),
            keep_last_frame: false,
            output_last_frame: false,
        }
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = attachment;
        self
    }

    pub fn parameters(mut self, parameters: TextureParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn size(mut self, width: impl Into<SizeParam>, height: impl Into<SizeParam>) -> Self {
        self.width = width.into();
        self.height = height.into();
        self
    }

    /// Sizes the pin relative to the viewport.
    pub fn scale(mut self, scale: f32) -> Self {
        self.width = SizeParam::Viewport { scale };
        self.height = SizeParam::Viewport { scale };
        self
    }

    pub fn keep_last_frame(mut self, keep: bool) -> Self {
        self.keep_last_frame = keep;
        self
    }

    pub fn output_last_frame(mut self, output: bool) -> Self {
        self.output_last_frame = output;
        self
    }

    /// Texture parameters for the current viewport.
    pub fn resolve(&self, viewport: &Viewport) -> TextureParameters {
        self.parameters.size(
            self.width.resolve(viewport, Axis::Width),
            self.height.resolve(viewport, Axis::Height),
        )
    }
}

/// Name and wiring of a node.
///
/// A node with `outputs == None` is terminal: it draws straight into the
/// target passed to [`Compositor::render`](crate::Compositor::render).
#[derive(Clone, Debug, Default)]
pub struct NodeDesc {
    pub name: String,
    pub inputs: Vec<(String, PinRef)>,
    pub outputs: Option<Vec<OutputPin>>,
}

impl NodeDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            outputs: None,
        }
    }

    /// Wires input `pin` to `from`, replacing an earlier wiring of the same pin.
    pub fn input(mut self, pin: impl Into<String>, from: impl Into<PinRef>) -> Self {
        let pin = pin.into();
        let from = from.into();
        match self.inputs.iter_mut().find(|(name, _)| *name == pin) {
            Some(slot) => slot.1 = from,
            None => self.inputs.push((pin, from)),
        }
        self
    }

    /// Declares an output pin, making the node non-terminal.
    pub fn output(mut self, pin: OutputPin) -> Self {
        let outputs = self.outputs.get_or_insert_with(Vec::new);
        match outputs.iter_mut().find(|existing| existing.name == pin.name) {
            Some(existing) => *existing = pin,
            None => outputs.push(pin),
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.outputs.is_none()
    }

    pub fn output_pin(&self, name: &str) -> Option<&OutputPin> {
        self.outputs.as_ref()?.iter().find(|pin| pin.name == name)
    }

    /// The pin an input gets when its reference names no pin.
    pub fn default_output(&self) -> Option<&OutputPin> {
        self.outputs.as_ref()?.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_up_and_stay_positive() {
        let viewport = Viewport::new(801, 600);

        assert_eq!(SizeParam::Viewport { scale: 0.5 }.resolve(&viewport, Axis::Width), 401);
        assert_eq!(SizeParam::Fixed(0).resolve(&viewport, Axis::Height), 1);
        assert_eq!(SizeParam::func(|_| -3.0).resolve(&viewport, Axis::Width), 1);
        assert_eq!(SizeParam::func(|_| f32::NAN).resolve(&viewport, Axis::Width), 1);
    }

    #[test]
    fn expression_sizes_see_the_scaled_viewport() {
        let viewport = Viewport::new(800, 600);
        let size = SizeParam::Expr {
            expr: Expression::parse("width / 3").unwrap(),
            scale: 0.5,
        };

        assert_eq!(size.resolve(&viewport, Axis::Width), 134);
    }

    #[test]
    fn output_pin_resolves_into_its_template() {
        let pin = OutputPin::new("color")
            .parameters(TextureParameters::default().mipmap(false))
            .size(256u32, SizeParam::viewport());
        let params = pin.resolve(&Viewport::new(1024, 768));

        assert_eq!((params.width, params.height), (256, 768));
        assert!(!params.use_mipmap);
    }

    #[test]
    fn redeclaring_pins_replaces_them() {
        let desc = NodeDesc::new("blur")
            .input("texture", "scene")
            .input("texture", ("other", "depth"))
            .output(OutputPin::new("color"))
            .output(OutputPin::new("color").keep_last_frame(true));

        assert_eq!(desc.inputs.len(), 1);
        assert_eq!(desc.inputs[0].1.to_string(), "other.depth");
        assert_eq!(desc.outputs.as_ref().map(Vec::len), Some(1));
        assert!(desc.default_output().unwrap().keep_last_frame);
        assert!(!desc.is_terminal());
        assert!(NodeDesc::new("out").is_terminal());
    }
}
