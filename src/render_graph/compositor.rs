//! Per-frame orchestration: reference counting, pull rendering, cycles.

use std::collections::{BTreeMap, HashSet};

use crate::backend::{RenderBackend, RenderTarget, TextureHandle, UniformValue, Viewport};
use crate::config::CompositorConfig;
use crate::error::CompositorError;
use crate::render_graph::graph::GraphNode;
use crate::render_graph::{
    Graph, Link, NodeDesc, NodeId, RenderContext, RenderNode, SharedFrameBuffer,
};
use crate::texture::{Attachment, TextureParameters};
use crate::texture_pool::{PoolKey, TexturePool};

/// Which nodes have been reached during the current frame.
#[derive(Debug, Default)]
struct FrameVisit {
    /// Nodes whose render is on the call stack. Pulling from one of these is a
    /// cycle and gets last frame's texture.
    visiting: HashSet<NodeId>,
    /// Nodes whose inputs were already walked by the reference pass.
    counted: HashSet<NodeId>,
    rendered: HashSet<NodeId>,
}

impl FrameVisit {
    fn clear(&mut self) {
        self.visiting.clear();
        self.counted.clear();
        self.rendered.clear();
    }
}

/// An output pin as seen by one render: where it attaches and what backs it.
struct PlannedOutput {
    name: String,
    attachment: Attachment,
    provided: Option<TextureHandle>,
    parameters: TextureParameters,
}

/// Drives a [`Graph`] frame by frame.
///
/// Every frame runs the same four steps:
///
/// 1. Reset reference counts and visit marks of all nodes.
/// 2. Walk upstream from each terminal node, counting for every output pin
///    how many consumers will read it.
/// 3. Render each terminal node into the final target. Inputs are pulled on
///    demand, so a node renders the first time any consumer asks for it, and
///    at most once. When the last consumer has read a pin, its texture goes
///    back to the pool (or is kept for the next frame with `keep_last_frame`).
/// 4. Retire whatever is still checked out.
///
/// A pull that runs into a node whose render is still in progress is a cycle.
/// It is answered with that node's last-frame texture instead of recursing.
///
/// # Example
///
/// ```ignore
/// let mut compositor = Compositor::new();
/// compositor.add_node(
///     NodeDesc::new("scene").output(OutputPin::new("color")),
///     SceneNode::new(scene, camera),
/// );
/// compositor.add_node(
///     NodeDesc::new("out").input("texture", "scene"),
///     FilterNode::new(COPY_WGSL),
/// );
///
/// compositor.render(&mut backend, RenderTarget::Default)?;
/// ```
pub struct Compositor {
    graph: Graph,
    pool: TexturePool,
    frame_buffer: SharedFrameBuffer,
    visit: FrameVisit,
    terminals: Vec<NodeId>,
    config: CompositorConfig,
    viewport: Viewport,
    frame_index: u64,
}

impl Compositor {
    /// Creates an empty compositor with the default [`CompositorConfig`].
    pub fn new() -> Self {
        Self::with_config(CompositorConfig::default())
    }

    /// Creates an empty compositor.
    ///
    /// # Arguments
    ///
    /// * `config` - Pool limit and blank texture handling
    ///
    /// # Example
    ///
    /// ```ignore
    /// let compositor = Compositor::with_config(CompositorConfig::new().max_textures(64));
    /// ```
    pub fn with_config(config: CompositorConfig) -> Self {
        Self {
            graph: Graph::new(),
            pool: TexturePool::with_limit(config.max_textures),
            frame_buffer: SharedFrameBuffer::new(),
            visit: FrameVisit::default(),
            terminals: Vec::new(),
            config,
            viewport: Viewport::new(1, 1),
            frame_index: 0,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Adds a node to the graph.
    ///
    /// The graph is re-linked at the start of the next [`render`](Self::render),
    /// so nodes can be added in any order and may reference nodes that are
    /// added later.
    ///
    /// # Arguments
    ///
    /// * `desc` - Name, input wiring and output pins. A node without outputs
    ///   is terminal and draws into the target passed to `render`.
    /// * `node` - What the node draws
    ///
    /// # Returns
    ///
    /// The id used by [`set_parameter`](Self::set_parameter),
    /// [`output_texture`](Self::output_texture) and friends.
    pub fn add_node<N: RenderNode + 'static>(&mut self, desc: NodeDesc, node: N) -> NodeId {
        self.graph.add_node(desc, node)
    }

    /// [`add_node`](Self::add_node) for nodes built at runtime, such as the
    /// ones the descriptor loader creates.
    pub fn add_boxed_node(&mut self, desc: NodeDesc, node: Box<dyn RenderNode>) -> NodeId {
        self.graph.add_boxed_node(desc, node)
    }

    /// Removes a node. Its retained textures go back to the pool.
    ///
    /// Inputs that read the node are disconnected on the next frame and see
    /// `None`.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Box<dyn RenderNode>> {
        let mut entry = self.graph.take_node(id)?;
        for texture in entry.state.drain() {
            self.pool.put(texture);
        }
        self.terminals.retain(|terminal| *terminal != id);
        Some(entry.node)
    }

    /// The first node added under `name`.
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.graph.find_node(name)
    }

    /// Sets a uniform on a node between frames.
    ///
    /// # Arguments
    ///
    /// * `id` - Node to update; unknown ids are ignored
    /// * `name` - Uniform name as the node's shader declares it
    /// * `value` - New value, used from the next render on
    pub fn set_parameter(&mut self, id: NodeId, name: &str, value: UniformValue) {
        if let Some(node) = self.graph.node_mut(id) {
            node.set_parameter(name, value);
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    /// Terminal nodes found by the last re-link.
    pub fn terminals(&self) -> &[NodeId] {
        &self.terminals
    }

    /// Number of frames rendered so far, failed ones included.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The texture `pin` of `id` was last rendered into.
    ///
    /// Between frames this may already be back in the pool unless the pin
    /// keeps its last frame.
    pub fn output_texture(&self, id: NodeId, pin: &str) -> Option<TextureHandle> {
        let entry = self.graph.entry(id)?;
        entry
            .node
            .provided_output(pin)
            .or_else(|| entry.state.written(pin))
    }

    pub fn last_frame_texture(&self, id: NodeId, pin: &str) -> Option<TextureHandle> {
        self.graph.entry(id)?.state.previous(pin)
    }

    /// Outstanding consumer count of an output pin in the current frame.
    pub fn references(&self, id: NodeId, pin: &str) -> u32 {
        self.graph
            .entry(id)
            .map_or(0, |entry| entry.state.references(pin))
    }

    /// Checks out a texture from the compositor's pool.
    ///
    /// Lets code outside the graph share intermediate textures with it. Hand
    /// the texture back with [`release_texture`](Self::release_texture).
    ///
    /// # Arguments
    ///
    /// * `params` - Requested texture; it is normalized before the pool lookup
    /// * `backend` - Creates the texture when no idle one matches
    ///
    /// # Errors
    ///
    /// [`CompositorError::PoolExhausted`] when the pool is at its limit, or
    /// the backend's allocation error.
    pub fn allocate_texture(
        &mut self,
        params: &TextureParameters,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureHandle, CompositorError> {
        self.pool.get(params, backend)
    }

    /// Returns a texture taken with [`allocate_texture`](Self::allocate_texture).
    pub fn release_texture(&mut self, texture: TextureHandle) {
        self.pool.put(texture);
    }

    /// Renders one frame into `target`.
    ///
    /// A backend error aborts the frame, but textures checked out so far are
    /// still returned, so the next frame starts from a consistent pool.
    ///
    /// # Arguments
    ///
    /// * `backend` - Draws the nodes and sizes the viewport
    /// * `target` - Where terminal nodes draw
    pub fn render(
        &mut self,
        backend: &mut dyn RenderBackend,
        target: RenderTarget,
    ) -> Result<(), CompositorError> {
        if self.graph.is_dirty() {
            self.graph.update();
            self.terminals = self.graph.terminal_nodes();
        }

        self.viewport = backend.viewport();
        self.before_frame();

        let terminals = self.terminals.clone();
        for terminal in &terminals {
            self.update_reference(*terminal, None);
        }

        let mut result = Ok(());
        for terminal in terminals {
            if self.visit.rendered.contains(&terminal) {
                continue;
            }
            if let Err(err) = self.render_node(terminal, backend, target) {
                log::debug!("frame {} aborted: {}", self.frame_index, err);
                result = Err(err);
                break;
            }
        }

        self.after_frame(backend);
        self.frame_index += 1;
        result
    }

    /// Releases every GPU resource the compositor holds.
    ///
    /// Nodes stay in the graph. Rendering again allocates fresh textures.
    pub fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            if let Some(entry) = self.graph.entry_mut(id) {
                entry.state.drain();
            }
        }
        self.pool.clear(backend);
        self.frame_buffer.dispose(backend);
    }

    fn before_frame(&mut self) {
        self.visit.clear();
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            if let Some(entry) = self.graph.entry_mut(id) {
                let GraphNode { desc, state, .. } = entry;
                let pins = desc.outputs.iter().flatten().map(|pin| pin.name.as_str());
                state.reset_references(pins);
            }
        }
    }

    /// Counts one more consumer of `pin` and, on first visit, walks the
    /// node's own inputs.
    ///
    /// Walking each node once makes every count equal the number of consumer
    /// edges that will actually be pulled. It also stops the walk on cycles.
    fn update_reference(&mut self, id: NodeId, pin: Option<&str>) {
        if self.visit.counted.insert(id) {
            let inputs: Vec<Link> = self
                .graph
                .links(id)
                .map(|links| links.inputs.values().cloned().collect())
                .unwrap_or_default();
            for link in inputs {
                self.update_reference(link.node, Some(&link.pin));
            }
        }
        if let (Some(pin), Some(entry)) = (pin, self.graph.entry_mut(id)) {
            entry.state.add_reference(pin);
        }
    }

    fn render_node(
        &mut self,
        id: NodeId,
        backend: &mut dyn RenderBackend,
        target: RenderTarget,
    ) -> Result<(), CompositorError> {
        self.visit.visiting.insert(id);
        let result = self.render_visiting(id, backend, target);
        self.visit.visiting.remove(&id);
        result
    }

    fn render_visiting(
        &mut self,
        id: NodeId,
        backend: &mut dyn RenderBackend,
        target: RenderTarget,
    ) -> Result<(), CompositorError> {
        let Some(entry) = self.graph.entry(id) else {
            return Ok(());
        };
        let declared: Vec<(String, Option<Link>)> = entry
            .desc
            .inputs
            .iter()
            .map(|(pin, _)| (pin.clone(), entry.links.inputs.get(pin).cloned()))
            .collect();
        let terminal = entry.desc.is_terminal();
        let planned: Vec<PlannedOutput> = entry
            .desc
            .outputs
            .iter()
            .flatten()
            .map(|pin| PlannedOutput {
                name: pin.name.clone(),
                attachment: pin.attachment,
                provided: entry.node.provided_output(&pin.name),
                parameters: pin.resolve(&self.viewport),
            })
            .collect();

        let mut inputs = BTreeMap::new();
        for (pin, link) in &declared {
            let texture = match link {
                Some(link) => self.get_output(link.node, &link.pin, backend, target)?,
                None => None,
            };
            inputs.insert(pin.clone(), texture);
        }

        let mut outputs = BTreeMap::new();
        let mut attachments = Vec::new();
        let mut mipmapped = Vec::new();
        for output in planned {
            if let Some(texture) = output.provided {
                outputs.insert(output.name, texture);
                continue;
            }
            self.evict_resized(id, &output.name, &output.parameters, backend);
            let texture = self.pool.get(&output.parameters, backend)?;
            if let Some(entry) = self.graph.entry_mut(id) {
                entry.state.set_current(&output.name, texture);
            }
            let normalized = PoolKey::new(&output.parameters);
            if normalized.parameters().use_mipmap && normalized.parameters().min_filter.is_mipmapped()
            {
                mipmapped.push(texture);
            }
            attachments.push((output.attachment, texture));
            outputs.insert(output.name, texture);
        }

        let draw_target = if terminal {
            self.frame_buffer.unbind(backend);
            target
        } else {
            RenderTarget::FrameBuffer(self.frame_buffer.bind_outputs(backend, &attachments)?)
        };

        let Some(entry) = self.graph.entry_mut(id) else {
            return Ok(());
        };
        let GraphNode { desc, node, .. } = entry;
        let mut ctx = RenderContext {
            backend: &mut *backend,
            viewport: self.viewport,
            target: draw_target,
            inputs: &inputs,
            outputs: &outputs,
            node_name: &desc.name,
            terminal,
            frame: self.frame_index,
        };
        node.render(&mut ctx)?;
        log::trace!("rendered node '{}'", desc.name);

        for texture in mipmapped {
            backend.generate_mipmaps(texture)?;
        }
        for link in declared.into_iter().filter_map(|(_, link)| link) {
            self.remove_reference(link.node, &link.pin, backend);
        }
        self.visit.rendered.insert(id);
        Ok(())
    }

    /// The texture a consumer reads from output `pin` of `id`, rendering the
    /// node first if nobody has pulled it yet this frame.
    fn get_output(
        &mut self,
        id: NodeId,
        pin: &str,
        backend: &mut dyn RenderBackend,
        target: RenderTarget,
    ) -> Result<Option<TextureHandle>, CompositorError> {
        if self.visit.visiting.contains(&id) {
            log::trace!("cycle through node {:?}, reading last frame of '{}'", id, pin);
            return self.last_frame_output(id, pin, backend);
        }
        let already_rendered = self.visit.rendered.contains(&id);
        if !already_rendered {
            self.render_node(id, backend, target)?;
        }

        let Some(entry) = self.graph.entry(id) else {
            return Ok(None);
        };
        if let Some(texture) = entry.node.provided_output(pin) {
            return Ok(Some(texture));
        }
        // Only a consumer arriving after the node rendered gets last frame.
        // The consumer whose pull triggered the render reads the fresh texture.
        let output_last_frame = entry
            .desc
            .output_pin(pin)
            .is_some_and(|output| output.output_last_frame);
        if output_last_frame && already_rendered {
            return self.last_frame_output(id, pin, backend);
        }
        Ok(entry.state.current(pin))
    }

    /// Last frame's texture of a pin, or a blank one when there is none yet.
    fn last_frame_output(
        &mut self,
        id: NodeId,
        pin: &str,
        backend: &mut dyn RenderBackend,
    ) -> Result<Option<TextureHandle>, CompositorError> {
        let Some(entry) = self.graph.entry(id) else {
            return Ok(None);
        };
        if let Some(texture) = entry.node.provided_output(pin) {
            return Ok(Some(texture));
        }
        if let Some(texture) = entry.state.previous(pin) {
            return Ok(Some(texture));
        }
        let Some(parameters) = entry
            .desc
            .output_pin(pin)
            .map(|output| output.resolve(&self.viewport))
        else {
            return Ok(None);
        };

        let texture = self.pool.get(&parameters, backend)?;
        if self.config.clear_blank_textures {
            if let Err(err) = backend.clear_texture(texture) {
                self.pool.put(texture);
                return Err(err.into());
            }
        }
        if let Some(entry) = self.graph.entry_mut(id) {
            entry.state.replace_previous(pin, texture);
        }
        log::debug!("allocated blank last-frame texture {:?} for pin '{}'", texture, pin);
        Ok(Some(texture))
    }

    fn remove_reference(&mut self, id: NodeId, pin: &str, backend: &mut dyn RenderBackend) {
        let Some(entry) = self.graph.entry_mut(id) else {
            return;
        };
        match entry.state.remove_reference(pin) {
            Some(0) => self.retire_output(id, pin, backend),
            Some(_) => {}
            None => log::warn!(
                "reference count of {}.{} would drop below zero",
                entry.desc.name,
                pin
            ),
        }
    }

    /// Ends the frame lifetime of a pin's current texture.
    fn retire_output(&mut self, id: NodeId, pin: &str, backend: &mut dyn RenderBackend) {
        let Some(entry) = self.graph.entry_mut(id) else {
            return;
        };
        let Some(texture) = entry.state.take_current(pin) else {
            return;
        };
        let keep_last_frame = entry
            .desc
            .output_pin(pin)
            .is_some_and(|output| output.keep_last_frame);

        if !keep_last_frame {
            self.pool.put(texture);
            return;
        }
        match entry.state.replace_previous(pin, texture) {
            Some(old) if old != texture => {
                let resized = self.pool.parameters(old).map(|p| (p.width, p.height))
                    != self.pool.parameters(texture).map(|p| (p.width, p.height));
                self.pool.put(old);
                if resized {
                    self.pool.evict(old, backend);
                }
            }
            _ => {}
        }
    }

    /// Disposes the texture a pin last rendered into when its size changed.
    fn evict_resized(
        &mut self,
        id: NodeId,
        pin: &str,
        parameters: &TextureParameters,
        backend: &mut dyn RenderBackend,
    ) {
        let Some(old) = self.graph.entry(id).and_then(|entry| entry.state.written(pin)) else {
            return;
        };
        let resized = self
            .pool
            .parameters(old)
            .is_some_and(|p| (p.width, p.height) != (parameters.width, parameters.height));
        if resized && self.pool.evict(old, backend) {
            log::debug!("pin {:?}.{} resized, evicted {:?}", id, pin, old);
        }
    }

    fn after_frame(&mut self, backend: &mut dyn RenderBackend) {
        let ids: Vec<NodeId> = self.graph.ids().collect();
        for id in ids {
            let Some(entry) = self.graph.entry_mut(id) else {
                continue;
            };
            let pins = entry.state.current_pins();
            if self.visit.rendered.contains(&id) {
                for pin in pins {
                    self.retire_output(id, &pin, backend);
                }
            } else {
                // Aborted mid-render: nothing valid was drawn, so nothing is kept.
                for pin in pins {
                    if let Some(texture) = entry.state.take_current(&pin) {
                        self.pool.put(texture);
                    }
                }
            }
            if let Some(entry) = self.graph.entry_mut(id) {
                entry.state.reset_references(std::iter::empty());
            }
        }
        self.visit.clear();
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use proptest::prelude::*;

    use super::*;
    use crate::backend::{BackendEvent, DrawCall, FullscreenDraw, RecordingBackend};
    use crate::error::BackendError;
    use crate::render_graph::{OutputPin, TextureNode};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Draws a fullscreen pass and records what it saw.
    #[derive(Default, Clone)]
    struct Pass {
        log: Rc<RefCell<Vec<(String, BTreeMap<String, Option<TextureHandle>>)>>>,
    }

    impl Pass {
        fn renders_of(&self, name: &str) -> usize {
            self.log.borrow().iter().filter(|(node, _)| node == name).count()
        }

        fn inputs_of(&self, name: &str) -> Vec<BTreeMap<String, Option<TextureHandle>>> {
            self.log
                .borrow()
                .iter()
                .filter(|(node, _)| node == name)
                .map(|(_, inputs)| inputs.clone())
                .collect()
        }
    }

    impl RenderNode for Pass {
        fn render(&mut self, ctx: &mut RenderContext) -> Result<(), CompositorError> {
            self.log
                .borrow_mut()
                .push((ctx.node_name.to_string(), ctx.inputs.clone()));
            let uniforms = BTreeMap::new();
            let defines = BTreeMap::new();
            ctx.draw(&DrawCall::Fullscreen(FullscreenDraw {
                label: ctx.node_name,
                shader: "",
                textures: ctx.inputs,
                uniforms: &uniforms,
                defines: &defines,
                clear_color: None,
            }))
        }
    }

    fn color(name: &str) -> OutputPin {
        OutputPin::new(name).parameters(TextureParameters::default().mipmap(false))
    }

    fn half_res(name: &str) -> OutputPin {
        color(name).scale(0.5)
    }

    #[test]
    fn blur_chain_returns_intermediates_to_the_pool() {
        init_logger();
        let mut backend = RecordingBackend::new(640, 480);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        let blur_h = compositor.add_node(
            NodeDesc::new("blurH")
                .input("texture", "scene")
                .output(color("color")),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("blurV").input("texture", "blurH"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        assert_eq!(
            pass.log.borrow().iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            vec!["scene", "blurH", "blurV"]
        );
        let scene_texture = compositor.output_texture(scene, "color").unwrap();
        let blur_texture = compositor.output_texture(blur_h, "color").unwrap();
        assert_ne!(scene_texture, blur_texture);
        assert_eq!(pass.inputs_of("blurH")[0]["texture"], Some(scene_texture));
        assert_eq!(pass.inputs_of("blurV")[0]["texture"], Some(blur_texture));
        assert!(compositor.pool().is_idle(scene_texture));
        assert!(compositor.pool().is_idle(blur_texture));
        assert_eq!(compositor.pool().idle_count(), 2);
        assert_eq!(compositor.pool().checked_out_count(), 0);
        assert_eq!(
            backend.draws().last().map(|draw| draw.target),
            Some(RenderTarget::Default)
        );

        // Steady state: the second frame allocates nothing.
        let created = backend.created_texture_count();
        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        assert_eq!(backend.created_texture_count(), created);
        assert_eq!(compositor.frame_index(), 2);
    }

    #[test]
    fn scaled_pins_get_their_own_textures() {
        let mut backend = RecordingBackend::new(640, 480);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        let blur = compositor.add_node(
            NodeDesc::new("blur")
                .input("texture", "scene")
                .output(half_res("color")),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "blur"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let texture = compositor.output_texture(blur, "color").unwrap();
        let params = backend.texture_parameters(texture).unwrap();
        assert_eq!((params.width, params.height), (320, 240));
        assert_eq!(compositor.pool().allocated_count(), 2);
    }

    #[test]
    fn pool_reuses_released_textures_within_a_frame() {
        let mut backend = RecordingBackend::new(256, 256);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(NodeDesc::new("a").output(color("color")), pass.clone());
        compositor.add_node(
            NodeDesc::new("b").input("texture", "a").output(color("color")),
            pass.clone(),
        );
        compositor.add_node(
            NodeDesc::new("c").input("texture", "b").output(color("color")),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "c"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        // a is released once b drew, so c renders into a's old texture.
        assert_eq!(compositor.pool().allocated_count(), 2);
        let inputs = pass.inputs_of("b");
        assert_eq!(pass.inputs_of("out")[0]["texture"], inputs[0]["texture"]);
    }

    #[test]
    fn fan_in_renders_each_node_once() {
        let mut backend = RecordingBackend::new(128, 128);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        compositor.add_node(
            NodeDesc::new("left").input("texture", "scene").output(color("color")),
            pass.clone(),
        );
        compositor.add_node(
            NodeDesc::new("right").input("texture", "scene").output(color("color")),
            pass.clone(),
        );
        compositor.add_node(
            NodeDesc::new("mix")
                .input("a", "left")
                .input("b", "right")
                .input("c", "scene"),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("debug").input("texture", "scene"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        for name in ["scene", "left", "right", "mix", "debug"] {
            assert_eq!(pass.renders_of(name), 1, "{name}");
        }
        let scene_texture = compositor.output_texture(scene, "color");
        assert_eq!(pass.inputs_of("debug")[0]["texture"], scene_texture);
        assert_eq!(compositor.references(scene, "color"), 0);
        assert_eq!(compositor.pool().checked_out_count(), 0);
    }

    #[test]
    fn cycles_read_last_frame_and_terminate() {
        init_logger();
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let a = compositor.add_node(
            NodeDesc::new("a")
                .input("feedback", "b")
                .output(color("color").keep_last_frame(true)),
            pass.clone(),
        );
        let b = compositor.add_node(
            NodeDesc::new("b")
                .input("source", "a")
                .output(color("color").keep_last_frame(true)),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "a"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        assert_eq!(pass.renders_of("a"), 1);
        assert_eq!(pass.renders_of("b"), 1);
        // b ran while a was still pulling its inputs, so it saw a blank texture.
        let blank = pass.inputs_of("b")[0]["source"].unwrap();
        assert!(backend.events().contains(&BackendEvent::ClearTexture(blank)));
        let a_first = compositor.output_texture(a, "color");
        let b_first = compositor.output_texture(b, "color");
        assert_eq!(compositor.last_frame_texture(a, "color"), a_first);

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        assert_eq!(pass.renders_of("a"), 2);
        assert_eq!(pass.renders_of("b"), 2);
        // b reads a's previous frame, a reads what b drew this frame.
        assert_eq!(pass.inputs_of("b")[1]["source"], a_first);
        assert_eq!(
            pass.inputs_of("a")[1]["feedback"],
            compositor.output_texture(b, "color")
        );
        assert_eq!(compositor.last_frame_texture(b, "color"), compositor.output_texture(b, "color"));
        assert_ne!(compositor.output_texture(b, "color"), b_first);
        assert!(backend.is_live(a_first.unwrap()));
    }

    #[test]
    fn output_last_frame_pull_reads_the_fresh_texture() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let src = compositor.add_node(
            NodeDesc::new("src").output(color("color").output_last_frame(true)),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "src"), pass.clone());

        for frame in 0..3 {
            compositor.render(&mut backend, RenderTarget::Default).unwrap();

            let written = compositor.output_texture(src, "color");
            assert!(written.is_some());
            assert_eq!(pass.inputs_of("out")[frame]["texture"], written);
        }
        // Nobody read last frame, so no blank texture was ever needed.
        assert!(
            !backend
                .events()
                .iter()
                .any(|event| matches!(event, BackendEvent::ClearTexture(_)))
        );
    }

    #[test]
    fn output_last_frame_serves_later_consumers_the_previous_frame() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let src = compositor.add_node(
            NodeDesc::new("src").output(
                color("color")
                    .keep_last_frame(true)
                    .output_last_frame(true),
            ),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("first").input("texture", "src"), pass.clone());
        compositor.add_node(NodeDesc::new("second").input("texture", "src"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        let written = compositor.output_texture(src, "color").unwrap();

        // `first` triggered the render, `second` came after it.
        assert_eq!(pass.inputs_of("first")[0]["texture"], Some(written));
        let blank = pass.inputs_of("second")[0]["texture"].unwrap();
        assert_ne!(blank, written);
        assert!(backend.events().contains(&BackendEvent::ClearTexture(blank)));
        assert_eq!(compositor.last_frame_texture(src, "color"), Some(written));

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let fresh = compositor.output_texture(src, "color").unwrap();
        assert_ne!(fresh, written);
        assert_eq!(pass.inputs_of("first")[1]["texture"], Some(fresh));
        assert_eq!(pass.inputs_of("second")[1]["texture"], Some(written));
        assert!(compositor.pool().is_idle(written));
        assert!(compositor.pool().is_checked_out(fresh));
    }

    #[test]
    fn keep_last_frame_survives_without_consumers() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(
            NodeDesc::new("scene").output(color("color")).output(
                color("history")
                    .attachment(Attachment::Color(1))
                    .keep_last_frame(true),
            ),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "scene"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        let first = compositor.last_frame_texture(scene, "history").unwrap();
        assert_eq!(compositor.references(scene, "history"), 0);

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let kept = compositor.last_frame_texture(scene, "history").unwrap();
        assert_ne!(kept, first);
        assert_eq!(compositor.output_texture(scene, "history"), Some(kept));
        assert!(backend.is_live(kept));
        assert!(compositor.pool().is_checked_out(kept));
        assert!(compositor.pool().is_idle(first));
        assert_eq!(pass.renders_of("scene"), 2);
    }

    #[test]
    fn reference_pass_counts_every_consumer_edge() {
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        let a = compositor.add_node(
            NodeDesc::new("a").input("texture", "scene").output(color("color")),
            pass.clone(),
        );
        let b = compositor.add_node(
            NodeDesc::new("b").input("texture", "scene").output(color("color")),
            pass.clone(),
        );
        compositor.add_node(
            NodeDesc::new("out").input("left", "a").input("right", "b"),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("preview").input("texture", "scene"), pass.clone());

        compositor.graph.update();
        compositor.terminals = compositor.graph.terminal_nodes();
        compositor.before_frame();
        for terminal in compositor.terminals.clone() {
            compositor.update_reference(terminal, None);
        }

        assert_eq!(compositor.terminals().len(), 2);
        assert_eq!(compositor.references(scene, "color"), 3);
        assert_eq!(compositor.references(a, "color"), 1);
        assert_eq!(compositor.references(b, "color"), 1);
        assert_eq!(pass.renders_of("scene"), 0);
    }

    #[test]
    fn disconnected_inputs_are_passed_as_none() {
        init_logger();
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(
            NodeDesc::new("out").input("texture", "nowhere"),
            pass.clone(),
        );

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        assert_eq!(pass.inputs_of("out")[0]["texture"], None);
    }

    #[test]
    fn terminals_unbind_and_filters_bind_the_shared_frame_buffer() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(
            NodeDesc::new("gbuffer")
                .output(color("albedo"))
                .output(color("normal").attachment(Attachment::Color(1))),
            pass.clone(),
        );
        compositor.add_node(
            NodeDesc::new("out")
                .input("albedo", ("gbuffer", "albedo"))
                .input("normal", ("gbuffer", "normal")),
            pass.clone(),
        );

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let draws: Vec<_> = backend.draws().cloned().collect();
        let RenderTarget::FrameBuffer(frame_buffer) = draws[0].target else {
            panic!("gbuffer should draw into the shared frame buffer");
        };
        assert_eq!(draws[0].attachments.len(), 2);
        assert_eq!(draws[1].target, RenderTarget::Default);
        let unbind_at = backend
            .events()
            .iter()
            .position(|event| *event == BackendEvent::Unbind(frame_buffer))
            .unwrap();
        let last_draw_at = backend
            .events()
            .iter()
            .rposition(|event| matches!(event, BackendEvent::Draw(_)))
            .unwrap();
        assert!(unbind_at < last_draw_at);
    }

    #[test]
    fn resize_evicts_stale_sizes() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        compositor.add_node(NodeDesc::new("out").input("texture", "scene"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        let small = compositor.output_texture(scene, "color").unwrap();
        backend.resize(128, 96);
        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let large = compositor.output_texture(scene, "color").unwrap();
        assert!(!backend.is_live(small));
        let params = backend.texture_parameters(large).unwrap();
        assert_eq!((params.width, params.height), (128, 96));
        assert_eq!(compositor.pool().allocated_count(), 1);
    }

    #[test]
    fn mipmapped_outputs_regenerate_their_chain() {
        let mut backend = RecordingBackend::new(256, 256);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let scene = compositor.add_node(
            NodeDesc::new("scene").output(OutputPin::new("color").size(256u32, 256u32)),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "scene"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        let texture = compositor.output_texture(scene, "color").unwrap();
        assert!(backend.events().contains(&BackendEvent::GenerateMipmaps(texture)));
    }

    #[test]
    fn provided_textures_bypass_the_pool() {
        let mut backend = RecordingBackend::new(64, 64);
        let lut = backend.create_texture(&TextureParameters::new(16, 16)).unwrap();
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(
            NodeDesc::new("lut").output(OutputPin::new("texture")),
            TextureNode::new(lut),
        );
        compositor.add_node(NodeDesc::new("out").input("lut", "lut"), pass.clone());

        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        assert_eq!(pass.inputs_of("out")[1]["lut"], Some(lut));
        assert_eq!(compositor.pool().allocated_count(), 0);
        assert!(backend.is_live(lut));
    }

    #[test]
    fn backend_failure_aborts_the_frame_but_keeps_the_pool_consistent() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(NodeDesc::new("scene").output(color("color")), pass.clone());
        compositor.add_node(
            NodeDesc::new("blur").input("texture", "scene").output(half_res("color")),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "blur"), pass.clone());

        backend.fail_next_allocations(1);
        let result = compositor.render(&mut backend, RenderTarget::Default);

        assert!(matches!(
            result,
            Err(CompositorError::Backend(BackendError::OutOfMemory(_)))
        ));
        assert_eq!(compositor.pool().allocated_count(), 0);
        assert_eq!(pass.renders_of("out"), 0);

        // The next frame starts clean and succeeds.
        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        assert_eq!(compositor.pool().checked_out_count(), 0);
        assert_eq!(pass.renders_of("out"), 1);
    }

    #[test]
    fn pool_limit_surfaces_as_an_error() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::with_config(CompositorConfig::new().max_textures(1));
        compositor.add_node(NodeDesc::new("a").output(color("color")), pass.clone());
        compositor.add_node(
            NodeDesc::new("b").input("texture", "a").output(half_res("color")),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "b"), pass.clone());

        let result = compositor.render(&mut backend, RenderTarget::Default);

        assert!(matches!(result, Err(CompositorError::PoolExhausted { limit: 1 })));
        assert_eq!(compositor.pool().checked_out_count(), 0);
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn removing_a_node_relinks_and_returns_its_textures() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        let trail = compositor.add_node(
            NodeDesc::new("trail").output(color("color").keep_last_frame(true)),
            pass.clone(),
        );
        let out = compositor.add_node(NodeDesc::new("out").input("texture", "trail"), pass.clone());
        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        let kept = compositor.last_frame_texture(trail, "color").unwrap();

        assert!(compositor.remove_node(trail).is_some());
        assert!(compositor.pool().is_idle(kept));

        compositor.render(&mut backend, RenderTarget::Default).unwrap();
        assert_eq!(pass.inputs_of("out")[1]["texture"], None);
        assert_eq!(compositor.terminals(), &[out]);
    }

    #[test]
    fn dispose_releases_everything() {
        let mut backend = RecordingBackend::new(64, 64);
        let pass = Pass::default();
        let mut compositor = Compositor::new();
        compositor.add_node(
            NodeDesc::new("scene").output(color("color").keep_last_frame(true)),
            pass.clone(),
        );
        compositor.add_node(NodeDesc::new("out").input("texture", "scene"), pass.clone());
        compositor.render(&mut backend, RenderTarget::Default).unwrap();

        compositor.dispose(&mut backend);

        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(compositor.pool().allocated_count(), 0);
        assert!(
            backend
                .events()
                .iter()
                .any(|event| matches!(event, BackendEvent::DisposeFrameBuffer(_)))
        );
    }

    proptest! {
        /// Random DAGs: every node a sink reaches renders exactly once, the
        /// rest never render, and counts drain to zero.
        #[test]
        fn reference_counts_balance_on_random_dags(
            edges in proptest::collection::vec((0usize..8, 0usize..8), 0..24),
            sinks in proptest::collection::vec(0usize..8, 1..3),
        ) {
            let mut backend = RecordingBackend::new(32, 32);
            let pass = Pass::default();
            let mut compositor = Compositor::new();
            let mut descs: Vec<NodeDesc> = (0..8)
                .map(|i| NodeDesc::new(format!("n{i}")).output(color("color")))
                .collect();
            for (k, (a, b)) in edges.iter().enumerate() {
                let (from, to) = ((*a).min(*b), (*a).max(*b));
                if from != to {
                    descs[to] = descs[to].clone().input(format!("in{k}"), format!("n{from}").as_str());
                }
            }
            let mut ids = Vec::new();
            for desc in descs {
                ids.push(compositor.add_node(desc, pass.clone()));
            }
            for (k, sink) in sinks.iter().enumerate() {
                compositor.add_node(
                    NodeDesc::new(format!("sink{k}")).input("texture", format!("n{sink}").as_str()),
                    pass.clone(),
                );
            }

            compositor.render(&mut backend, RenderTarget::Default).unwrap();

            let mut reachable: HashSet<usize> = HashSet::new();
            let mut pending: Vec<usize> = sinks.clone();
            while let Some(node) = pending.pop() {
                if !reachable.insert(node) {
                    continue;
                }
                for (a, b) in &edges {
                    let (from, to) = ((*a).min(*b), (*a).max(*b));
                    if from != to && to == node {
                        pending.push(from);
                    }
                }
            }

            for (i, id) in ids.iter().enumerate() {
                let name = format!("n{i}");
                let expected = usize::from(reachable.contains(&i));
                prop_assert_eq!(pass.renders_of(&name), expected);
                prop_assert_eq!(compositor.references(*id, "color"), 0);
            }
            prop_assert_eq!(compositor.pool().checked_out_count(), 0);
        }
    }
}
