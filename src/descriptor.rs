//! JSON compositor descriptors.
//!
//! A descriptor lists the nodes of a graph with their wiring, output pins and
//! shader parameters, plus the images they sample:
//!
//! ```json
//! {
//!   "config": { "max_textures": 256 },
//!   "textures": { "lut": { "path": "lut.png", "parameters": { "min_filter": "NEAREST" } } },
//!   "nodes": [
//!     { "name": "scene", "type": "scene",
//!       "outputs": { "color": { "parameters": { "scale": 0.5, "type": "HALF_FLOAT" } } } },
//!     { "name": "blurH", "shader": "#source(gaussian_blur)",
//!       "inputs": { "texture": "scene" },
//!       "outputs": { "color": { "parameters": { "width": "expr(width / 2)" } } },
//!       "parameters": { "blurSize": 2.0, "textureSize": "expr([width, height])", "lut": "#lut" },
//!       "defines": { "RADIUS": "4" } },
//!     { "name": "out", "shader": "#source(copy)", "inputs": { "texture": { "node": "blurH", "pin": "color" } } }
//!   ]
//! }
//! ```
//!
//! Node order, input order and output order are preserved; the first output
//! of a node is the one a bare node reference resolves to.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::PathBuf;

use serde::Deserialize;
use serde::de::{self, MapAccess, Visitor};

use crate::backend::{RenderBackend, SceneId, TextureHandle, UniformValue};
use crate::camera::Camera;
use crate::config::CompositorConfig;
use crate::error::CompositorError;
use crate::expr::Expression;
use crate::render_graph::{
    Compositor, FilterNode, NodeDesc, NodeId, OutputPin, PinRef, SceneNode, SizeParam, TextureNode,
};
use crate::texture::{Attachment, FilterMode, PixelType, TextureFormat, TextureParameters, WrapMode};

/// Everything a descriptor refers to by name.
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Shader library for `#source(name)` references.
    pub shaders: HashMap<String, String>,
    /// Scenes for scene nodes, keyed by the node's `scene` field (or its name).
    pub scenes: HashMap<String, SceneId>,
    /// Cameras for scene nodes, same keys as `scenes`.
    pub cameras: HashMap<String, Camera>,
    /// Caller-owned textures for texture nodes and `#name` parameters.
    pub textures: HashMap<String, TextureHandle>,
    /// Directory relative texture paths resolve against.
    pub texture_root: PathBuf,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shader(mut self, name: &str, source: impl Into<String>) -> Self {
        self.shaders.insert(name.to_string(), source.into());
        self
    }

    pub fn scene(mut self, name: &str, scene: SceneId, camera: Camera) -> Self {
        self.scenes.insert(name.to_string(), scene);
        self.cameras.insert(name.to_string(), camera);
        self
    }

    pub fn texture(mut self, name: &str, texture: TextureHandle) -> Self {
        self.textures.insert(name.to_string(), texture);
        self
    }

    pub fn texture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.texture_root = root.into();
        self
    }
}

/// A compositor built from a descriptor, plus the textures it uploaded.
pub struct LoadedCompositor {
    pub compositor: Compositor,
    /// Images from the descriptor's `"textures"` section. Owned by the caller.
    pub textures: HashMap<String, TextureHandle>,
}

impl LoadedCompositor {
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.compositor.node_id(name)
    }

    /// Disposes the compositor and every uploaded texture.
    pub fn dispose(mut self, backend: &mut dyn RenderBackend) {
        self.compositor.dispose(backend);
        for (_, texture) in self.textures.drain() {
            backend.dispose_texture(texture);
        }
    }
}

/// Parses a descriptor and builds its compositor.
pub fn load_compositor(
    json: &str,
    backend: &mut dyn RenderBackend,
    options: &LoadOptions,
) -> Result<LoadedCompositor, CompositorError> {
    let desc: CompositorDesc = serde_json::from_str(json)?;
    build(desc, backend, options)
}

/// Reads a descriptor file. Relative texture paths resolve against the
/// file's directory unless `options.texture_root` is set.
pub fn load_compositor_file(
    path: impl Into<PathBuf>,
    backend: &mut dyn RenderBackend,
    options: LoadOptions,
) -> Result<LoadedCompositor, CompositorError> {
    let path = path.into();
    let json = std::fs::read_to_string(&path)?;
    let mut options = options;
    if options.texture_root.as_os_str().is_empty() {
        if let Some(parent) = path.parent() {
            options.texture_root = parent.to_path_buf();
        }
    }
    load_compositor(&json, backend, &options)
}

#[derive(Debug, Deserialize)]
struct CompositorDesc {
    #[serde(default)]
    config: CompositorConfig,
    #[serde(default)]
    textures: OrderedMap<TextureDesc>,
    #[serde(default)]
    nodes: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
struct TextureDesc {
    path: PathBuf,
    #[serde(default)]
    parameters: ParametersDesc,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum NodeKind {
    #[default]
    Filter,
    Scene,
    Texture,
}

#[derive(Debug, Deserialize)]
struct NodeEntry {
    name: String,
    #[serde(rename = "type", default)]
    kind: NodeKind,
    #[serde(default)]
    inputs: OrderedMap<InputDesc>,
    /// Absent means the node is terminal.
    #[serde(default)]
    outputs: Option<OrderedMap<OutputDesc>>,

    // Filter nodes.
    #[serde(default)]
    shader: Option<String>,
    #[serde(default)]
    parameters: OrderedMap<serde_json::Value>,
    #[serde(default)]
    defines: OrderedMap<serde_json::Value>,
    #[serde(default)]
    clear_color: Option<[f32; 4]>,
    #[serde(default)]
    no_clear: bool,

    // Scene nodes.
    #[serde(default)]
    scene: Option<String>,
    #[serde(default)]
    final_clear_color: Option<[f32; 4]>,
    #[serde(default)]
    pre_z: bool,
    #[serde(default)]
    update_scene: Option<bool>,

    // Texture nodes.
    #[serde(default)]
    texture: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputDesc {
    Node(String),
    Pin { node: String, pin: Option<String> },
}

impl From<InputDesc> for PinRef {
    fn from(input: InputDesc) -> Self {
        match input {
            InputDesc::Node(node) => PinRef::new(node),
            InputDesc::Pin { node, pin: None } => PinRef::new(node),
            InputDesc::Pin {
                node,
                pin: Some(pin),
            } => PinRef::new(node).pin(pin),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OutputDesc {
    #[serde(default)]
    parameters: ParametersDesc,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SizeDesc {
    Pixels(f64),
    Text(String),
}

/// Texture parameters with the pin options that ride along with them.
#[derive(Debug, Default, Deserialize)]
struct ParametersDesc {
    width: Option<SizeDesc>,
    height: Option<SizeDesc>,
    scale: Option<f32>,
    #[serde(rename = "type")]
    pixel_type: Option<PixelType>,
    format: Option<TextureFormat>,
    wrap: Option<WrapMode>,
    wrap_s: Option<WrapMode>,
    wrap_t: Option<WrapMode>,
    min_filter: Option<FilterMode>,
    mag_filter: Option<FilterMode>,
    use_mipmap: Option<bool>,
    anisotropic: Option<u32>,
    flip_y: Option<bool>,
    unpack_alignment: Option<u32>,
    premultiply_alpha: Option<bool>,
    attachment: Option<String>,
    #[serde(default)]
    keep_last_frame: bool,
    #[serde(default)]
    output_last_frame: bool,
}

impl ParametersDesc {
    fn texture_parameters(&self) -> TextureParameters {
        let defaults = TextureParameters::default();
        let wrap = self.wrap;
        TextureParameters {
            width: defaults.width,
            height: defaults.height,
            pixel_type: self.pixel_type.unwrap_or(defaults.pixel_type),
            format: self.format.unwrap_or(defaults.format),
            wrap_s: self.wrap_s.or(wrap).unwrap_or(defaults.wrap_s),
            wrap_t: self.wrap_t.or(wrap).unwrap_or(defaults.wrap_t),
            min_filter: self.min_filter.unwrap_or(defaults.min_filter),
            mag_filter: self.mag_filter.unwrap_or(defaults.mag_filter),
            use_mipmap: self.use_mipmap.unwrap_or(defaults.use_mipmap),
            anisotropic: self.anisotropic.unwrap_or(defaults.anisotropic),
            flip_y: self.flip_y.unwrap_or(defaults.flip_y),
            unpack_alignment: self.unpack_alignment.unwrap_or(defaults.unpack_alignment),
            premultiply_alpha: self.premultiply_alpha.unwrap_or(defaults.premultiply_alpha),
        }
    }

    fn size(&self, size: Option<&SizeDesc>) -> Result<SizeParam, CompositorError> {
        let scale = self.scale.unwrap_or(1.0);
        match size {
            None => Ok(SizeParam::Viewport { scale }),
            Some(SizeDesc::Pixels(pixels)) => Ok(SizeParam::Fixed(pixels.max(1.0).ceil() as u32)),
            Some(SizeDesc::Text(text)) => match Expression::from_descriptor(text) {
                Some(expr) => Ok(SizeParam::Expr { expr: expr?, scale }),
                None => Err(CompositorError::Descriptor(format!(
                    "size '{text}' is neither a number nor an expr(...)"
                ))),
            },
        }
    }

    fn output_pin(&self, name: String) -> Result<OutputPin, CompositorError> {
        let attachment = match &self.attachment {
            Some(attachment) => Attachment::from_name(attachment).ok_or_else(|| {
                CompositorError::Descriptor(format!("unknown attachment '{attachment}'"))
            })?,
            None if self.format.is_some_and(TextureFormat::is_depth) => {
                match self.format {
                    Some(TextureFormat::DepthStencil) => Attachment::DepthStencil,
                    _ => Attachment::Depth,
                }
            }
            None => Attachment::default(),
        };

        Ok(OutputPin::new(name)
            .attachment(attachment)
            .parameters(self.texture_parameters())
            .size(self.size(self.width.as_ref())?, self.size(self.height.as_ref())?)
            .keep_last_frame(self.keep_last_frame)
            .output_last_frame(self.output_last_frame))
    }
}

/// A JSON object read in document order.
#[derive(Debug)]
struct OrderedMap<T>(Vec<(String, T)>);

impl<T> Default for OrderedMap<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedMap<T> {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
            type Value = OrderedMap<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry()? {
                    entries.push(entry);
                }
                Ok(OrderedMap(entries))
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

fn build(
    desc: CompositorDesc,
    backend: &mut dyn RenderBackend,
    options: &LoadOptions,
) -> Result<LoadedCompositor, CompositorError> {
    let mut textures = HashMap::new();
    let result = upload_textures(&desc.textures, backend, options, &mut textures)
        .and_then(|()| build_compositor(desc, options, &textures));

    match result {
        Ok(compositor) => Ok(LoadedCompositor {
            compositor,
            textures,
        }),
        Err(err) => {
            for (_, texture) in textures {
                backend.dispose_texture(texture);
            }
            Err(err)
        }
    }
}

fn upload_textures(
    descs: &OrderedMap<TextureDesc>,
    backend: &mut dyn RenderBackend,
    options: &LoadOptions,
    textures: &mut HashMap<String, TextureHandle>,
) -> Result<(), CompositorError> {
    for (name, desc) in &descs.0 {
        let path = options.texture_root.join(&desc.path);
        let image = image::open(&path)?.to_rgba8();
        let (width, height) = image.dimensions();
        let params = desc.parameters.texture_parameters().size(width, height);

        let texture = backend.create_texture_with_data(&params.normalized(), image.as_raw())?;
        log::debug!("loaded texture '{}' from {} ({}x{})", name, path.display(), width, height);
        textures.insert(name.clone(), texture);
    }
    Ok(())
}

fn build_compositor(
    desc: CompositorDesc,
    options: &LoadOptions,
    loaded: &HashMap<String, TextureHandle>,
) -> Result<Compositor, CompositorError> {
    let find_texture = |name: &str| {
        options
            .textures
            .get(name)
            .or_else(|| loaded.get(name))
            .copied()
            .ok_or_else(|| CompositorError::Descriptor(format!("unknown texture '{name}'")))
    };

    let mut compositor = Compositor::with_config(desc.config);
    for mut entry in desc.nodes {
        let mut node_desc = NodeDesc::new(entry.name.clone());
        for (pin, input) in std::mem::take(&mut entry.inputs).0 {
            node_desc = node_desc.input(pin, PinRef::from(input));
        }
        if let Some(outputs) = entry.outputs.take() {
            node_desc.outputs = Some(Vec::with_capacity(outputs.0.len()));
            for (pin, output) in outputs.0 {
                node_desc = node_desc.output(output.parameters.output_pin(pin)?);
            }
        }

        match entry.kind {
            NodeKind::Filter => {
                let node = filter_node(&entry, options, &find_texture)?;
                compositor.add_node(node_desc, node);
            }
            NodeKind::Scene => {
                let key = entry.scene.as_deref().unwrap_or(&entry.name);
                let scene = options.scenes.get(key).copied().ok_or_else(|| {
                    CompositorError::Descriptor(format!("unknown scene '{key}'"))
                })?;
                let camera = options.cameras.get(key).copied().unwrap_or_default();

                let mut node = SceneNode::new(scene, camera)
                    .with_pre_z(entry.pre_z)
                    .with_scene_update(entry.update_scene.unwrap_or(true));
                if let Some(color) = entry.clear_color {
                    node = node.with_clear(color);
                }
                if let Some(color) = entry.final_clear_color {
                    node = node.with_final_clear(color);
                }
                compositor.add_node(node_desc, node);
            }
            NodeKind::Texture => {
                let name = entry.texture.as_deref().unwrap_or(&entry.name);
                let name = name.strip_prefix('#').unwrap_or(name);
                compositor.add_node(node_desc, TextureNode::new(find_texture(name)?));
            }
        }
    }
    Ok(compositor)
}

fn filter_node(
    entry: &NodeEntry,
    options: &LoadOptions,
    find_texture: &impl Fn(&str) -> Result<TextureHandle, CompositorError>,
) -> Result<FilterNode, CompositorError> {
    let shader = entry.shader.as_deref().ok_or_else(|| {
        CompositorError::Descriptor(format!("filter node '{}' has no shader", entry.name))
    })?;
    let source = match shader
        .strip_prefix("#source(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        Some(name) => options
            .shaders
            .get(name.trim())
            .ok_or_else(|| CompositorError::UnknownShader(name.trim().to_string()))?,
        None => shader,
    };

    let mut node = FilterNode::new(source);
    if entry.no_clear {
        node = node.no_clear();
    } else if let Some(color) = entry.clear_color {
        node = node.with_clear(color);
    }

    for (name, value) in &entry.parameters.0 {
        node = match parameter_value(value)? {
            Parameter::Value(value) => node.with_parameter(name, value),
            Parameter::Texture(texture) => {
                node.with_parameter(name, UniformValue::Texture(find_texture(texture)?))
            }
            Parameter::Expr(expr) => node.with_expression(name, expr),
        };
    }

    for (symbol, value) in &entry.defines.0 {
        let value = match value {
            serde_json::Value::String(text) => text.clone(),
            serde_json::Value::Bool(true) => "1".to_string(),
            serde_json::Value::Bool(false) => "0".to_string(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        node = node.with_define(symbol, &value);
    }
    Ok(node)
}

enum Parameter<'a> {
    Value(UniformValue),
    Texture(&'a str),
    Expr(Expression),
}

fn parameter_value(value: &serde_json::Value) -> Result<Parameter<'_>, CompositorError> {
    use serde_json::Value;

    let invalid = || CompositorError::Descriptor(format!("unsupported parameter value {value}"));
    match value {
        Value::Number(number) => number
            .as_f64()
            .map(|x| Parameter::Value(UniformValue::Float(x as f32)))
            .ok_or_else(invalid),
        Value::Bool(flag) => Ok(Parameter::Value(UniformValue::Int(*flag as i32))),
        Value::Array(items) => {
            let components = items
                .iter()
                .map(|item| item.as_f64().map(|x| x as f32))
                .collect::<Option<Vec<f32>>>()
                .ok_or_else(invalid)?;
            UniformValue::from_slice(&components)
                .map(Parameter::Value)
                .ok_or_else(invalid)
        }
        Value::String(text) => {
            if let Some(texture) = text.strip_prefix('#') {
                Ok(Parameter::Texture(texture))
            } else if let Some(expr) = Expression::from_descriptor(text) {
                Ok(Parameter::Expr(expr?))
            } else {
                Err(invalid())
            }
        }
        Value::Null | Value::Object(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingBackend, RenderTarget, Viewport};
    use crate::render_graph::Axis;

    const BLUR_CHAIN: &str = r##"{
        "config": { "max_textures": 32 },
        "nodes": [
            { "name": "scene", "type": "scene",
              "outputs": { "color": { "parameters": { "scale": 0.5, "type": "HALF_FLOAT" } },
                           "depth": { "parameters": { "format": "DEPTH_COMPONENT" } } } },
            { "name": "blurH", "shader": "#source(blur)",
              "inputs": { "texture": "scene", "depth": { "node": "scene", "pin": "depth" } },
              "outputs": { "color": { "parameters": { "width": "expr(width / 2)", "height": 64 } } },
              "parameters": { "blurDir": 0, "offset": [1, 2], "textureSize": "expr([width, height])" },
              "defines": { "RADIUS": 4, "FAST": true } },
            { "name": "out", "shader": "#source(copy)", "no_clear": true,
              "inputs": { "texture": { "node": "blurH" } } }
        ]
    }"##;

    fn options() -> LoadOptions {
        LoadOptions::new()
            .shader("blur", "blur source")
            .shader("copy", "copy source")
            .scene("scene", SceneId::new(7), Camera::new())
    }

    #[test]
    fn builds_the_described_graph() {
        let mut backend = RecordingBackend::new(400, 300);
        let loaded = load_compositor(BLUR_CHAIN, &mut backend, &options()).unwrap();
        let graph = loaded.compositor.graph();

        assert_eq!(loaded.compositor.config().max_textures, 32);
        assert_eq!(graph.len(), 3);

        let scene = loaded.node_id("scene").unwrap();
        let outputs = graph.desc(scene).unwrap().outputs.as_ref().unwrap();
        assert_eq!(outputs[0].name, "color");
        assert_eq!(outputs[1].attachment, Attachment::Depth);

        let viewport = Viewport::new(400, 300);
        let color = outputs[0].resolve(&viewport);
        assert_eq!((color.width, color.height), (200, 150));
        assert_eq!(color.pixel_type, PixelType::HalfFloat);

        let blur = loaded.node_id("blurH").unwrap();
        let pin = graph.desc(blur).unwrap().output_pin("color").unwrap();
        assert_eq!(pin.width.resolve(&viewport, Axis::Width), 200);
        assert_eq!(pin.height.resolve(&viewport, Axis::Height), 64);

        let out = loaded.node_id("out").unwrap();
        assert!(graph.desc(out).unwrap().is_terminal());
    }

    #[test]
    fn loaded_graph_renders_with_parameters() {
        let mut backend = RecordingBackend::new(400, 300);
        let mut loaded = load_compositor(BLUR_CHAIN, &mut backend, &options()).unwrap();

        loaded
            .compositor
            .render(&mut backend, RenderTarget::Default)
            .unwrap();

        let blur = backend.draws().find(|draw| draw.label == "blurH").unwrap().clone();
        assert_eq!(blur.shader.as_deref(), Some("blur source"));
        assert_eq!(blur.uniforms["blurDir"], UniformValue::Float(0.0));
        assert_eq!(blur.uniforms["offset"], UniformValue::Vec2([1.0, 2.0]));
        assert_eq!(blur.uniforms["textureSize"], UniformValue::Vec2([400.0, 300.0]));
        assert_eq!(blur.defines["RADIUS"], "4");
        assert_eq!(blur.defines["FAST"], "1");
        assert!(blur.textures["depth"].is_some());

        let out = backend.draws().find(|draw| draw.label == "out").unwrap().clone();
        assert_eq!(out.target, RenderTarget::Default);
        assert_eq!(out.clear_color, None);
    }

    #[test]
    fn unknown_shader_is_an_error() {
        let json = r##"{ "nodes": [ { "name": "a", "shader": "#source(missing)" } ] }"##;
        let mut backend = RecordingBackend::new(64, 64);

        let err = load_compositor(json, &mut backend, &LoadOptions::new()).err().unwrap();
        assert!(matches!(err, CompositorError::UnknownShader(name) if name == "missing"));
    }

    #[test]
    fn literal_shader_and_texture_parameters() {
        let json = r##"{
            "nodes": [
                { "name": "src", "type": "texture", "texture": "#noise",
                  "outputs": { "color": {} } },
                { "name": "mix", "shader": "literal wgsl",
                  "inputs": { "texture": "src" },
                  "parameters": { "noise": "#noise" } }
            ]
        }"##;
        let mut backend = RecordingBackend::new(64, 64);
        let noise = backend.create_texture(&TextureParameters::new(8, 8)).unwrap();
        let options = LoadOptions::new().texture("noise", noise);

        let mut loaded = load_compositor(json, &mut backend, &options).unwrap();
        loaded
            .compositor
            .render(&mut backend, RenderTarget::Default)
            .unwrap();

        let mix = backend.draws().find(|draw| draw.label == "mix").unwrap().clone();
        assert_eq!(mix.shader.as_deref(), Some("literal wgsl"));
        assert_eq!(mix.uniforms["noise"], UniformValue::Texture(noise));
        assert_eq!(mix.textures["texture"], Some(noise));
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let mut backend = RecordingBackend::new(64, 64);
        let cases = [
            r#"{ "nodes": [ { "name": "a" } ] }"#,
            r#"{ "nodes": [ { "name": "a", "shader": "x", "parameters": { "p": "text" } } ] }"#,
            r#"{ "nodes": [ { "name": "a", "shader": "x", "parameters": { "p": [1, 2, 3, 4, 5] } } ] }"#,
            r#"{ "nodes": [ { "name": "a", "shader": "x", "outputs": { "c": { "parameters": { "attachment": "BACK" } } } } ] }"#,
            r#"{ "nodes": [ { "name": "a", "shader": "x", "outputs": { "c": { "parameters": { "width": "big" } } } } ] }"#,
            r#"{ "nodes": [ { "name": "a", "type": "scene" } ] }"#,
            r#"{ "nodes": [ { "name": "a", "type": "texture" } ] }"#,
        ];

        for json in cases {
            let err = load_compositor(json, &mut backend, &LoadOptions::new()).err();
            assert!(
                matches!(err, Some(CompositorError::Descriptor(_))),
                "{json} gave {err:?}"
            );
        }

        let err = load_compositor("{ nope", &mut backend, &LoadOptions::new()).err();
        assert!(matches!(err, Some(CompositorError::Json(_))));
    }

    #[test]
    fn bad_expression_reports_its_source() {
        let json = r#"{ "nodes": [ { "name": "a", "shader": "x", "parameters": { "p": "expr(width +)" } } ] }"#;
        let mut backend = RecordingBackend::new(64, 64);

        let err = load_compositor(json, &mut backend, &LoadOptions::new()).err();
        assert!(matches!(err, Some(CompositorError::Expression { .. })));
    }

    #[test]
    fn descriptor_textures_are_uploaded_and_owned_by_the_result() {
        let dir = std::env::temp_dir().join(format!("pinwheel-descriptor-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        image::RgbaImage::from_pixel(4, 2, image::Rgba([255, 0, 0, 255]))
            .save(dir.join("lut.png"))
            .unwrap();

        let json = r##"{
            "textures": { "lut": { "path": "lut.png", "parameters": { "min_filter": "NEAREST", "wrap": "REPEAT" } } },
            "nodes": [ { "name": "grade", "shader": "grade", "parameters": { "lut": "#lut" } } ]
        }"##;
        let mut backend = RecordingBackend::new(64, 64);
        let options = LoadOptions::new().texture_root(&dir);

        let loaded = load_compositor(json, &mut backend, &options).unwrap();
        let lut = loaded.textures["lut"];
        let params = backend.texture_parameters(lut).copied().unwrap();
        assert_eq!((params.width, params.height), (4, 2));
        assert_eq!(params.min_filter, FilterMode::Nearest);
        // 4x2 is a power of two, so the requested wrap survives.
        assert_eq!(params.wrap_s, WrapMode::Repeat);

        loaded.dispose(&mut backend);
        assert!(!backend.is_live(lut));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_texture_file_is_an_error() {
        let json = r#"{ "textures": { "lut": { "path": "definitely-missing.png" } } }"#;
        let mut backend = RecordingBackend::new(64, 64);

        let err = load_compositor(json, &mut backend, &LoadOptions::new()).err();
        assert!(matches!(err, Some(CompositorError::Image(_))));
        assert_eq!(backend.live_texture_count(), 0);
    }
}
