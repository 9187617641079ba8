//! An in-memory backend that records every call.
//!
//! `RecordingBackend` hands out handles, tracks which textures are alive and
//! what each frame buffer has attached, and appends a [`BackendEvent`] for every
//! call. Draw calls that reference a disposed texture fail, so use-after-release
//! bugs in a graph show up as errors instead of silent corruption.

use std::collections::{BTreeMap, HashMap};

use crate::backend::{
    DrawCall, FrameBufferHandle, RenderBackend, RenderTarget, TextureHandle, UniformValue, Viewport,
};
use crate::error::BackendError;
use crate::texture::{Attachment, TextureParameters};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawKind {
    Fullscreen,
    Scene,
}

/// Snapshot of a draw call and the state it observed.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub kind: DrawKind,
    pub target: RenderTarget,
    pub textures: BTreeMap<String, Option<TextureHandle>>,
    pub uniforms: BTreeMap<String, UniformValue>,
    pub defines: BTreeMap<String, String>,
    /// Fragment source of fullscreen draws.
    pub shader: Option<String>,
    pub clear_color: Option<[f32; 4]>,
    /// Attachments of the target frame buffer at draw time.
    pub attachments: BTreeMap<Attachment, TextureHandle>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendEvent {
    CreateTexture(TextureHandle, TextureParameters),
    ClearTexture(TextureHandle),
    DisposeTexture(TextureHandle),
    CreateFrameBuffer(FrameBufferHandle),
    DisposeFrameBuffer(FrameBufferHandle),
    Bind(FrameBufferHandle),
    Unbind(FrameBufferHandle),
    Attach(FrameBufferHandle, TextureHandle, Attachment),
    DetachAll(FrameBufferHandle),
    Draw(DrawRecord),
    GenerateMipmaps(TextureHandle),
}

pub struct RecordingBackend {
    viewport: Viewport,
    next_handle: u64,
    textures: HashMap<TextureHandle, TextureParameters>,
    frame_buffers: HashMap<FrameBufferHandle, BTreeMap<Attachment, TextureHandle>>,
    bound: Option<FrameBufferHandle>,
    events: Vec<BackendEvent>,
    failing_allocations: usize,
}

impl RecordingBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            viewport: Viewport::new(width, height),
            next_handle: 1,
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            bound: None,
            events: Vec::new(),
            failing_allocations: 0,
        }
    }

    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.viewport.device_pixel_ratio = ratio;
        self
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.viewport.width = width;
        self.viewport.height = height;
    }

    /// Makes the next `count` texture allocations fail with `OutOfMemory`.
    pub fn fail_next_allocations(&mut self, count: usize) {
        self.failing_allocations = count;
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.events.iter().filter_map(|event| match event {
            BackendEvent::Draw(record) => Some(record),
            _ => None,
        })
    }

    /// Number of recorded draws carrying the given label.
    pub fn draw_count(&self, label: &str) -> usize {
        self.draws().filter(|draw| draw.label == label).count()
    }

    pub fn created_texture_count(&self) -> usize {
        self.events
            .iter()
            .filter(|event| matches!(event, BackendEvent::CreateTexture(..)))
            .count()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn is_live(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn texture_parameters(&self, texture: TextureHandle) -> Option<&TextureParameters> {
        self.textures.get(&texture)
    }

    pub fn bound_frame_buffer(&self) -> Option<FrameBufferHandle> {
        self.bound
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn check_live(&self, texture: TextureHandle) -> Result<(), BackendError> {
        if self.textures.contains_key(&texture) {
            Ok(())
        } else {
            Err(BackendError::UnknownTexture(texture))
        }
    }
}

impl RenderBackend for RecordingBackend {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_texture(&mut self, params: &TextureParameters) -> Result<TextureHandle, BackendError> {
        if self.failing_allocations > 0 {
            self.failing_allocations -= 1;
            return Err(BackendError::OutOfMemory(params.to_string()));
        }
        if params.width == 0 || params.height == 0 {
            return Err(BackendError::InvalidSize {
                width: params.width,
                height: params.height,
            });
        }
        let texture = TextureHandle::new(self.next_handle());
        self.textures.insert(texture, *params);
        self.events.push(BackendEvent::CreateTexture(texture, *params));
        Ok(texture)
    }

    fn create_texture_with_data(
        &mut self,
        params: &TextureParameters,
        rgba: &[u8],
    ) -> Result<TextureHandle, BackendError> {
        let expected = params.width as usize * params.height as usize * 4;
        if rgba.len() != expected {
            return Err(BackendError::InvalidSize {
                width: params.width,
                height: params.height,
            });
        }
        self.create_texture(params)
    }

    fn clear_texture(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        self.check_live(texture)?;
        self.events.push(BackendEvent::ClearTexture(texture));
        Ok(())
    }

    fn dispose_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            for attachments in self.frame_buffers.values_mut() {
                attachments.retain(|_, attached| *attached != texture);
            }
            self.events.push(BackendEvent::DisposeTexture(texture));
        }
    }

    fn create_frame_buffer(&mut self) -> Result<FrameBufferHandle, BackendError> {
        let frame_buffer = FrameBufferHandle::new(self.next_handle());
        self.frame_buffers.insert(frame_buffer, BTreeMap::new());
        self.events.push(BackendEvent::CreateFrameBuffer(frame_buffer));
        Ok(frame_buffer)
    }

    fn dispose_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) {
        if self.frame_buffers.remove(&frame_buffer).is_some() {
            if self.bound == Some(frame_buffer) {
                self.bound = None;
            }
            self.events.push(BackendEvent::DisposeFrameBuffer(frame_buffer));
        }
    }

    fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> Result<(), BackendError> {
        if !self.frame_buffers.contains_key(&frame_buffer) {
            return Err(BackendError::UnknownFrameBuffer(frame_buffer));
        }
        self.bound = Some(frame_buffer);
        self.events.push(BackendEvent::Bind(frame_buffer));
        Ok(())
    }

    fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) {
        if self.bound == Some(frame_buffer) {
            self.bound = None;
        }
        self.events.push(BackendEvent::Unbind(frame_buffer));
    }

    fn attach(
        &mut self,
        frame_buffer: FrameBufferHandle,
        texture: TextureHandle,
        attachment: Attachment,
    ) -> Result<(), BackendError> {
        self.check_live(texture)?;
        let attachments = self
            .frame_buffers
            .get_mut(&frame_buffer)
            .ok_or(BackendError::UnknownFrameBuffer(frame_buffer))?;
        attachments.insert(attachment, texture);
        self.events
            .push(BackendEvent::Attach(frame_buffer, texture, attachment));
        Ok(())
    }

    fn detach_all(&mut self, frame_buffer: FrameBufferHandle) {
        if let Some(attachments) = self.frame_buffers.get_mut(&frame_buffer) {
            attachments.clear();
        }
        self.events.push(BackendEvent::DetachAll(frame_buffer));
    }

    fn draw(&mut self, call: &DrawCall<'_>, target: RenderTarget) -> Result<(), BackendError> {
        let attachments = match target {
            RenderTarget::Default => BTreeMap::new(),
            RenderTarget::FrameBuffer(frame_buffer) => self
                .frame_buffers
                .get(&frame_buffer)
                .cloned()
                .ok_or(BackendError::UnknownFrameBuffer(frame_buffer))?,
        };

        let record = match call {
            DrawCall::Fullscreen(draw) => {
                for texture in draw.textures.values().flatten() {
                    self.check_live(*texture)?;
                }
                for value in draw.uniforms.values() {
                    if let UniformValue::Texture(texture) = value {
                        self.check_live(*texture)?;
                    }
                }
                DrawRecord {
                    label: draw.label.to_string(),
                    kind: DrawKind::Fullscreen,
                    target,
                    textures: draw.textures.clone(),
                    uniforms: draw.uniforms.clone(),
                    defines: draw.defines.clone(),
                    shader: Some(draw.shader.to_string()),
                    clear_color: draw.clear_color,
                    attachments,
                }
            }
            DrawCall::Scene(draw) => DrawRecord {
                label: draw.label.to_string(),
                kind: DrawKind::Scene,
                target,
                textures: BTreeMap::new(),
                uniforms: BTreeMap::new(),
                defines: BTreeMap::new(),
                shader: None,
                clear_color: draw.clear_color,
                attachments,
            },
        };
        self.events.push(BackendEvent::Draw(record));
        Ok(())
    }

    fn generate_mipmaps(&mut self, texture: TextureHandle) -> Result<(), BackendError> {
        self.check_live(texture)?;
        self.events.push(BackendEvent::GenerateMipmaps(texture));
        Ok(())
    }
}
