//! The shared intermediate frame buffer and the context handed to nodes.

use std::collections::BTreeMap;

use crate::backend::{
    DrawCall, FrameBufferHandle, RenderBackend, RenderTarget, TextureHandle, Viewport,
};
use crate::error::{BackendError, CompositorError};
use crate::texture::Attachment;

/// The one frame buffer every non-terminal node renders through.
///
/// Created lazily on first use. Each node re-attaches its own outputs, and
/// stale attachments from the previous node are always detached first.
#[derive(Debug, Default)]
pub struct SharedFrameBuffer {
    handle: Option<FrameBufferHandle>,
}

impl SharedFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Option<FrameBufferHandle> {
        self.handle
    }

    /// Binds the frame buffer with exactly `attachments` attached.
    pub fn bind_outputs(
        &mut self,
        backend: &mut dyn RenderBackend,
        attachments: &[(Attachment, TextureHandle)],
    ) -> Result<FrameBufferHandle, BackendError> {
        let frame_buffer = match self.handle {
            Some(handle) => handle,
            None => {
                let handle = backend.create_frame_buffer()?;
                log::debug!("created shared frame buffer {:?}", handle);
                self.handle = Some(handle);
                handle
            }
        };

        backend.bind_frame_buffer(frame_buffer)?;
        backend.detach_all(frame_buffer);
        for (attachment, texture) in attachments {
            backend.attach(frame_buffer, *texture, *attachment)?;
        }
        Ok(frame_buffer)
    }

    /// Unbinds the frame buffer so the next draw lands on the final target.
    pub fn unbind(&self, backend: &mut dyn RenderBackend) {
        if let Some(frame_buffer) = self.handle {
            backend.unbind_frame_buffer(frame_buffer);
        }
    }

    pub fn dispose(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(frame_buffer) = self.handle.take() {
            backend.dispose_frame_buffer(frame_buffer);
        }
    }
}

/// Everything a node sees while it renders.
///
/// The `'a` lifetime ties the context to a single node render within a frame.
pub struct RenderContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub viewport: Viewport,
    /// Where draws land: the shared frame buffer, or the final target for
    /// terminal nodes.
    pub target: RenderTarget,
    /// Every declared input pin; `None` when disconnected.
    pub inputs: &'a BTreeMap<String, Option<TextureHandle>>,
    /// The texture attached for each output pin this frame.
    pub outputs: &'a BTreeMap<String, TextureHandle>,
    pub node_name: &'a str,
    pub terminal: bool,
    /// Number of frames rendered before this one.
    pub frame: u64,
}

impl RenderContext<'_> {
    pub fn input(&self, pin: &str) -> Option<TextureHandle> {
        self.inputs.get(pin).copied().flatten()
    }

    pub fn output(&self, pin: &str) -> Option<TextureHandle> {
        self.outputs.get(pin).copied()
    }

    pub fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), CompositorError> {
        self.backend.draw(call, self.target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendEvent, RecordingBackend};
    use crate::texture::TextureParameters;

    #[test]
    fn rebinding_detaches_stale_attachments() {
        let mut backend = RecordingBackend::new(32, 32);
        let a = backend.create_texture(&TextureParameters::new(32, 32)).unwrap();
        let b = backend.create_texture(&TextureParameters::new(32, 32)).unwrap();
        let mut shared = SharedFrameBuffer::new();

        let first = shared
            .bind_outputs(&mut backend, &[(Attachment::Color(0), a), (Attachment::Color(1), b)])
            .unwrap();
        backend.clear_events();
        let second = shared
            .bind_outputs(&mut backend, &[(Attachment::Color(0), b)])
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(
            backend.events(),
            &[
                BackendEvent::Bind(first),
                BackendEvent::DetachAll(first),
                BackendEvent::Attach(first, b, Attachment::Color(0)),
            ]
        );
    }

    #[test]
    fn dispose_forgets_the_handle() {
        let mut backend = RecordingBackend::new(32, 32);
        let mut shared = SharedFrameBuffer::new();
        shared.bind_outputs(&mut backend, &[]).unwrap();

        shared.dispose(&mut backend);

        assert!(shared.handle().is_none());
        assert!(backend.bound_frame_buffer().is_none());
    }
}
