//! The node set and its resolved wiring.

use std::collections::BTreeMap;

use crate::render_graph::{NodeDesc, NodeRef, NodeState, PinRef, RenderNode};

/// Stable handle to a node. Handles are never reused within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node's slot. Removed nodes leave their slot empty.
    pub fn index(self) -> usize {
        self.0
    }
}

/// One end of an edge: a node and one of its pins.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Link {
    pub node: NodeId,
    pub pin: String,
}

/// Resolved edges of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeLinks {
    /// Input pin -> the producer output feeding it.
    pub inputs: BTreeMap<String, Link>,
    /// Output pin -> every consumer input reading it.
    pub outputs: BTreeMap<String, Vec<Link>>,
}

pub(crate) struct GraphNode {
    pub desc: NodeDesc,
    pub node: Box<dyn RenderNode>,
    pub links: NodeLinks,
    pub state: NodeState,
}

/// Owns the nodes and turns their declared [`PinRef`]s into [`Link`]s.
///
/// Adding or removing a node marks the graph dirty. Nothing is re-linked until
/// [`update`](Self::update) runs, which the compositor does at the start of
/// the next frame.
pub struct Graph {
    nodes: Vec<Option<GraphNode>>,
    dirty: bool,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            dirty: false,
        }
    }

    /// Adds a node and marks the graph for re-linking.
    ///
    /// # Arguments
    ///
    /// * `desc` - Name, input wiring and output pins of the node
    /// * `node` - What the node draws
    ///
    /// # Returns
    ///
    /// The [`NodeId`] of the new node. It stays valid until the node is removed.
    pub fn add_node<N: RenderNode + 'static>(&mut self, desc: NodeDesc, node: N) -> NodeId {
        self.add_boxed_node(desc, Box::new(node))
    }

    /// Same as [`add_node`](Self::add_node) for an already boxed node.
    ///
    /// A name that is already taken is accepted with a warning.
    pub fn add_boxed_node(&mut self, desc: NodeDesc, node: Box<dyn RenderNode>) -> NodeId {
        if self.find_node(&desc.name).is_some() {
            log::warn!(
                "node name '{}' is already taken, lookups by name keep resolving to the first one",
                desc.name
            );
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(GraphNode {
            desc,
            node,
            links: NodeLinks::default(),
            state: NodeState::new(),
        }));
        self.dirty = true;
        id
    }

    /// Removes a node and hands back its draw implementation.
    ///
    /// Consumers of the removed node are disconnected on the next
    /// [`update`](Self::update). Returns `None` for an unknown or removed id.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Box<dyn RenderNode>> {
        self.take_node(id).map(|entry| entry.node)
    }

    pub(crate) fn take_node(&mut self, id: NodeId) -> Option<GraphNode> {
        let entry = self.nodes.get_mut(id.0)?.take()?;
        self.dirty = true;
        Some(entry)
    }

    /// The first live node added under `name`.
    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.ids().find(|id| {
            self.entry(*id)
                .is_some_and(|entry| entry.desc.name == name)
        })
    }

    /// Whether `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entry(id).is_some()
    }

    /// Live node ids in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(index, _)| NodeId(index))
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn desc(&self, id: NodeId) -> Option<&NodeDesc> {
        self.entry(id).map(|entry| &entry.desc)
    }

    /// Mutable access to a node's draw implementation, e.g. to change a
    /// parameter between frames.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut (dyn RenderNode + 'static)> {
        self.entry_mut(id).map(|entry| entry.node.as_mut())
    }

    /// Edges resolved by the last [`update`](Self::update).
    pub fn links(&self, id: NodeId) -> Option<&NodeLinks> {
        self.entry(id).map(|entry| &entry.links)
    }

    /// The producer pin feeding input `pin` of `id`, if connected.
    pub fn input_link(&self, id: NodeId, pin: &str) -> Option<&Link> {
        self.links(id)?.inputs.get(pin)
    }

    /// Every consumer input reading output `pin` of `id`.
    ///
    /// Empty when nothing reads the pin or the node does not exist.
    pub fn output_links(&self, id: NodeId, pin: &str) -> &[Link] {
        self.links(id)
            .and_then(|links| links.outputs.get(pin))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nodes without declared outputs, in insertion order.
    pub fn terminal_nodes(&self) -> Vec<NodeId> {
        self.ids()
            .filter(|id| self.desc(*id).is_some_and(NodeDesc::is_terminal))
            .collect()
    }

    /// Whether nodes were added or removed since the last re-link.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Rebuilds every link from the declared inputs.
    ///
    /// All old links are cleared first. Inputs that the node does not accept,
    /// or whose producer pin cannot be found, are reported and stay
    /// disconnected.
    pub fn update(&mut self) {
        let ids: Vec<NodeId> = self.ids().collect();
        for id in &ids {
            self.clear_links(*id);
        }

        for id in ids {
            let Some(entry) = self.entry(id) else {
                continue;
            };
            let name = entry.desc.name.clone();
            let inputs = entry.desc.inputs.clone();

            for (pin, from) in inputs {
                if !self.entry(id).is_some_and(|entry| entry.node.accepts_input(&pin)) {
                    log::warn!("pin {}.{} not used", name, pin);
                    continue;
                }
                match self.resolve(&from) {
                    Some(producer) => self.link(id, &pin, producer.node, &producer.pin),
                    None => log::warn!(
                        "pin {} does not exist, input {}.{} stays disconnected",
                        from,
                        name,
                        pin
                    ),
                }
            }
        }

        self.dirty = false;
        log::debug!("render graph re-linked ({} nodes)", self.len());
    }

    /// Resolves a reference to a declared output pin.
    ///
    /// # Arguments
    ///
    /// * `from` - A node name or id, plus an optional pin name
    ///
    /// # Returns
    ///
    /// The matching [`Link`], or `None` when the node does not exist or has
    /// no such output. A reference without a pin name picks the node's
    /// default output.
    pub fn resolve(&self, from: &PinRef) -> Option<Link> {
        let node = match &from.node {
            NodeRef::Name(name) => self.find_node(name)?,
            NodeRef::Id(id) => *id,
        };
        let desc = self.desc(node)?;
        let pin = match &from.pin {
            Some(pin) => desc.output_pin(pin)?,
            None => desc.default_output()?,
        };
        Some(Link {
            node,
            pin: pin.name.clone(),
        })
    }

    /// Connects `to_pin` of `to` to output `from_pin` of `from`.
    ///
    /// Linking an already connected input replaces the old edge on both ends.
    /// Nothing happens when either node is missing.
    ///
    /// # Arguments
    ///
    /// * `to` - The consuming node
    /// * `to_pin` - Input pin on `to`; the node is told to enable it
    /// * `from` - The producing node
    /// * `from_pin` - Output pin on `from`
    pub fn link(&mut self, to: NodeId, to_pin: &str, from: NodeId, from_pin: &str) {
        if !self.contains(from) {
            return;
        }
        let Some(consumer) = self.entry_mut(to) else {
            return;
        };
        let stale = consumer.links.inputs.insert(
            to_pin.to_string(),
            Link {
                node: from,
                pin: from_pin.to_string(),
            },
        );
        consumer.node.enable_input(to_pin);

        let back_edge = Link {
            node: to,
            pin: to_pin.to_string(),
        };
        if let Some(stale) = stale {
            if let Some(old) = self.entry_mut(stale.node) {
                if let Some(consumers) = old.links.outputs.get_mut(&stale.pin) {
                    consumers.retain(|link| *link != back_edge);
                }
            }
        }
        if let Some(producer) = self.entry_mut(from) {
            producer
                .links
                .outputs
                .entry(from_pin.to_string())
                .or_default()
                .push(back_edge);
        }
    }

    /// Drops all links of a node and disables its inputs.
    pub fn clear_links(&mut self, id: NodeId) {
        if let Some(entry) = self.entry_mut(id) {
            entry.links = NodeLinks::default();
            entry.node.disable_inputs();
        }
    }

    pub(crate) fn entry(&self, id: NodeId) -> Option<&GraphNode> {
        self.nodes.get(id.0)?.as_ref()
    }

    pub(crate) fn entry_mut(&mut self, id: NodeId) -> Option<&mut GraphNode> {
        self.nodes.get_mut(id.0)?.as_mut()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
