//! Per-node texture bookkeeping carried across frames.

use std::collections::BTreeMap;

use crate::backend::TextureHandle;

/// Textures and reference counts of one node's output pins.
#[derive(Debug, Default)]
pub struct NodeState {
    /// Pooled textures checked out for this frame, until their pin retires.
    current: BTreeMap<String, TextureHandle>,
    /// Last-frame textures, kept for `keep_last_frame` and cyclic reads.
    previous: BTreeMap<String, TextureHandle>,
    /// The texture each pin was most recently rendered into.
    written: BTreeMap<String, TextureHandle>,
    references: BTreeMap<String, u32>,
}

impl NodeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset_references<'a>(&mut self, pins: impl IntoIterator<Item = &'a str>) {
        self.references.clear();
        for pin in pins {
            self.references.insert(pin.to_string(), 0);
        }
    }

    pub fn add_reference(&mut self, pin: &str) {
        *self.references.entry(pin.to_string()).or_insert(0) += 1;
    }

    /// Decrements the count of `pin` and returns what is left.
    ///
    /// Returns `None` without touching anything when the count is already zero.
    pub fn remove_reference(&mut self, pin: &str) -> Option<u32> {
        let count = self.references.get_mut(pin).filter(|count| **count > 0)?;
        *count -= 1;
        Some(*count)
    }

    pub fn references(&self, pin: &str) -> u32 {
        self.references.get(pin).copied().unwrap_or(0)
    }

    pub fn set_current(&mut self, pin: &str, texture: TextureHandle) {
        self.current.insert(pin.to_string(), texture);
        self.written.insert(pin.to_string(), texture);
    }

    pub fn current(&self, pin: &str) -> Option<TextureHandle> {
        self.current.get(pin).copied()
    }

    pub fn take_current(&mut self, pin: &str) -> Option<TextureHandle> {
        self.current.remove(pin)
    }

    pub fn current_pins(&self) -> Vec<String> {
        self.current.keys().cloned().collect()
    }

    pub fn previous(&self, pin: &str) -> Option<TextureHandle> {
        self.previous.get(pin).copied()
    }

    /// Stores `texture` as the last-frame texture of `pin`, returning the one
    /// it displaces.
    pub fn replace_previous(&mut self, pin: &str, texture: TextureHandle) -> Option<TextureHandle> {
        self.previous.insert(pin.to_string(), texture)
    }

    pub fn written(&self, pin: &str) -> Option<TextureHandle> {
        self.written.get(pin).copied()
    }

    /// Empties the state, returning every texture still held (current and
    /// previous).
    pub fn drain(&mut self) -> Vec<TextureHandle> {
        let mut held: Vec<TextureHandle> = self.current.values().copied().collect();
        held.extend(self.previous.values().copied());
        held.sort();
        held.dedup();
        self.current.clear();
        self.previous.clear();
        self.written.clear();
        self.references.clear();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_never_go_negative() {
        let mut state = NodeState::new();
        state.reset_references(["color"]);
        state.add_reference("color");

        assert_eq!(state.remove_reference("color"), Some(0));
        assert_eq!(state.remove_reference("color"), None);
        assert_eq!(state.remove_reference("missing"), None);
        assert_eq!(state.references("color"), 0);
    }

    #[test]
    fn written_outlives_current() {
        let mut state = NodeState::new();
        let texture = TextureHandle::new(7);
        state.set_current("color", texture);

        assert_eq!(state.take_current("color"), Some(texture));
        assert_eq!(state.current("color"), None);
        assert_eq!(state.written("color"), Some(texture));
    }

    #[test]
    fn drain_returns_each_texture_once() {
        let mut state = NodeState::new();
        let texture = TextureHandle::new(1);
        state.set_current("color", texture);
        state.replace_previous("color", texture);
        state.replace_previous("depth", TextureHandle::new(2));

        assert_eq!(state.drain(), vec![texture, TextureHandle::new(2)]);
        assert!(state.written("color").is_none());
    }
}
