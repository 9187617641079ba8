//! [`RenderBackend`] implementation on top of wgpu.
//!
//! Pooled textures are real `wgpu::Texture`s, each with a sampler built from
//! its wrap and filter parameters. Frame buffers are logical attachment
//! tables: a draw into a frame buffer opens one render pass over whatever is
//! attached at that moment.
//!
//! # Filter shaders
//!
//! Fullscreen draws prepend a generated WGSL prelude to the node's fragment
//! source. For a filter with inputs `texture` and `mask`, a `blurSize: f32`
//! parameter and a `RADIUS` define, the prelude declares:
//!
//! ```wgsl
//! struct VertexOutput { @builtin(position) position: vec4<f32>, @location(0) uv: vec2<f32> }
//! @vertex fn vs(...) -> VertexOutput  // full-screen triangle
//!
//! struct Params {
//!     @size(16) target_size: vec2<f32>,
//!     @size(16) blurSize: f32,
//! }
//! @group(0) @binding(0) var<uniform> params: Params;
//! @group(0) @binding(1) var mask: texture_2d<f32>;
//! @group(0) @binding(2) var mask_sampler: sampler;
//! @group(0) @binding(3) var texture: texture_2d<f32>;
//! @group(0) @binding(4) var texture_sampler: sampler;
//! const RADIUS = 4;
//! const MASK_ENABLED = 0;
//! const TEXTURE_ENABLED = 1;
//! ```
//!
//! The node's source then only has to provide `@fragment fn fs(in: VertexOutput)`.
//! Disconnected inputs are bound to a 1×1 transparent placeholder.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use wgpu::util::DeviceExt;

use crate::backend::{
    DrawCall, FrameBufferHandle, FullscreenDraw, RenderBackend, RenderTarget, SceneDraw, SceneId,
    TextureHandle, UniformValue, Viewport,
};
use crate::error::BackendError;
use crate::gpu::GpuContext;
use crate::texture::{
    Attachment, FilterMode, PixelType, TextureFormat, TextureParameters, WrapMode,
};

/// Color format of the offscreen default target.
pub const DEFAULT_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Attachments a scene renders into.
pub struct SceneTarget<'a> {
    pub colors: Vec<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
    pub depth: Option<(&'a wgpu::TextureView, wgpu::TextureFormat)>,
    pub width: u32,
    pub height: u32,
}

/// Draws a scene registered with [`WgpuBackend::register_scene`].
///
/// Attachments have already been cleared when the draw asked for it, so
/// renderers should load, not clear.
pub trait SceneRenderer {
    fn render(
        &mut self,
        gpu: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        target: &SceneTarget<'_>,
        draw: &SceneDraw<'_>,
    ) -> Result<(), BackendError>;
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
}

/// How a texture is declared and sampled in a filter shader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SlotKind {
    Filterable,
    Unfilterable,
    Depth,
}

impl SlotKind {
    fn of(format: wgpu::TextureFormat) -> Self {
        if format.is_depth_stencil_format() {
            Self::Depth
        } else if matches!(
            format,
            wgpu::TextureFormat::R32Float
                | wgpu::TextureFormat::Rg32Float
                | wgpu::TextureFormat::Rgba32Float
        ) {
            Self::Unfilterable
        } else {
            Self::Filterable
        }
    }

    fn wgsl_type(self) -> &'static str {
        match self {
            Self::Depth => "texture_depth_2d",
            _ => "texture_2d<f32>",
        }
    }

    fn sample_type(self) -> wgpu::TextureSampleType {
        match self {
            Self::Filterable => wgpu::TextureSampleType::Float { filterable: true },
            Self::Unfilterable => wgpu::TextureSampleType::Float { filterable: false },
            Self::Depth => wgpu::TextureSampleType::Depth,
        }
    }

    fn sampler_type(self) -> wgpu::SamplerBindingType {
        match self {
            Self::Filterable => wgpu::SamplerBindingType::Filtering,
            _ => wgpu::SamplerBindingType::NonFiltering,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    source: String,
    slots: Vec<SlotKind>,
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

struct CachedPipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

/// Resolved attachments of a draw target.
struct TargetFormats {
    colors: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
    width: u32,
    height: u32,
}

/// wgpu render backend with an offscreen default target.
pub struct WgpuBackend {
    gpu: GpuContext,
    viewport: Viewport,
    next_handle: u64,
    textures: HashMap<TextureHandle, GpuTexture>,
    frame_buffers: HashMap<FrameBufferHandle, BTreeMap<Attachment, TextureHandle>>,
    bound: Option<FrameBufferHandle>,
    default_target: Option<GpuTexture>,
    placeholder: GpuTexture,
    nearest_sampler: wgpu::Sampler,
    pipelines: HashMap<PipelineKey, CachedPipeline>,
    scenes: HashMap<SceneId, Box<dyn SceneRenderer>>,
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext, width: u32, height: u32) -> Self {
        let placeholder = create_gpu_texture(
            &gpu.device,
            "Pinwheel Placeholder",
            &TextureParameters::new(1, 1).mipmap(false),
        );
        let nearest_sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Pinwheel Nearest Sampler"),
            ..Default::default()
        });

        Self {
            gpu,
            viewport: Viewport::new(width, height),
            next_handle: 1,
            textures: HashMap::new(),
            frame_buffers: HashMap::new(),
            bound: None,
            default_target: None,
            placeholder,
            nearest_sampler,
            pipelines: HashMap::new(),
            scenes: HashMap::new(),
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the viewport. The default target is recreated on next use.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 && (width, height) != (self.viewport.width, self.viewport.height)
        {
            self.viewport.width = width;
            self.viewport.height = height;
            self.default_target = None;
        }
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        self.viewport.device_pixel_ratio = ratio;
    }

    pub fn register_scene(&mut self, id: SceneId, renderer: impl SceneRenderer + 'static) {
        self.scenes.insert(id, Box::new(renderer));
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle).map(|texture| &texture.texture)
    }

    pub fn texture_view(&self, handle: TextureHandle) -> Option<&wgpu::TextureView> {
        self.textures.get(&handle).map(|texture| &texture.view)
    }

    /// The offscreen texture `RenderTarget::Default` draws land in.
    pub fn default_target(&self) -> Option<&wgpu::Texture> {
        self.default_target.as_ref().map(|target| &target.texture)
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn allocate(&mut self, params: &TextureParameters) -> Result<TextureHandle, BackendError> {
        let max = self.gpu.device.limits().max_texture_dimension_2d;
        if params.width == 0 || params.height == 0 || params.width > max || params.height > max {
            return Err(BackendError::InvalidSize {
                width: params.width,
                height: params.height,
            });
        }

        self.gpu
            .device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = create_gpu_texture(&self.gpu.device, "Pinwheel Pooled Texture", params);
        if let Some(err) = pollster::block_on(self.gpu.device.pop_error_scope()) {
            return Err(BackendError::OutOfMemory(format!("{params}: {err}")));
        }

        let handle = TextureHandle::new(self.next_handle());
        self.textures.insert(handle, texture);
        Ok(handle)
    }

    fn ensure_default_target(&mut self) {
        if self.default_target.is_none() {
            let params = TextureParameters::new(self.viewport.width, self.viewport.height)
                .mipmap(false);
            self.default_target = Some(create_gpu_texture_with_format(
                &self.gpu.device,
                "Pinwheel Default Target",
                &params,
                DEFAULT_TARGET_FORMAT,
            ));
        }
    }

    fn gpu_texture(&self, handle: TextureHandle) -> Result<&GpuTexture, BackendError> {
        self.textures
            .get(&handle)
            .ok_or(BackendError::UnknownTexture(handle))
    }

    /// Color attachments (in attachment order) and the depth attachment of a target.
    fn target_textures(
        &self,
        target: RenderTarget,
    ) -> Result<(Vec<&GpuTexture>, Option<&GpuTexture>), BackendError> {
        match target {
            RenderTarget::Default => {
                let color = self
                    .default_target
                    .as_ref()
                    .ok_or(BackendError::NoDefaultTarget)?;
                Ok((vec![color], None))
            }
            RenderTarget::FrameBuffer(frame_buffer) => {
                let attachments = self
                    .frame_buffers
                    .get(&frame_buffer)
                    .ok_or(BackendError::UnknownFrameBuffer(frame_buffer))?;
                let mut colors = Vec::new();
                let mut depth = None;
                for (attachment, handle) in attachments {
                    let texture = self.gpu_texture(*handle)?;
                    match attachment {
                        Attachment::Color(_) => colors.push(texture),
                        Attachment::Depth | Attachment::DepthStencil => depth = Some(texture),
                    }
                }
                if colors.is_empty() && depth.is_none() {
                    return Err(BackendError::Device(format!(
                        "frame buffer {:?} has nothing attached",
                        frame_buffer
                    )));
                }
                Ok((colors, depth))
            }
        }
    }

    fn target_formats(&self, target: RenderTarget) -> Result<TargetFormats, BackendError> {
        let (colors, depth) = self.target_textures(target)?;
        let (width, height) = colors
            .first()
            .or(depth.as_ref())
            .map(|texture| (texture.width, texture.height))
            .unwrap_or((self.viewport.width, self.viewport.height));
        Ok(TargetFormats {
            colors: colors.iter().map(|texture| texture.format).collect(),
            depth: depth.map(|texture| texture.format),
            width,
            height,
        })
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), BackendError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Pinwheel Filter Shader"),
            source: wgpu::ShaderSource::Wgsl(key.source.as_str().into()),
        });

        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }];
        for (index, kind) in key.slots.iter().enumerate() {
            let binding = 1 + 2 * index as u32;
            entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: kind.sample_type(),
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding + 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(kind.sampler_type()),
                count: None,
            });
        }
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Pinwheel Filter Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pinwheel Filter Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .colors
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Pinwheel Filter Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            // Filters never depth test; a depth attachment is only carried along.
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::Always,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(BackendError::Shader(err.to_string()));
        }

        self.pipelines
            .insert(key.clone(), CachedPipeline { pipeline, layout });
        Ok(())
    }

    fn draw_fullscreen(
        &mut self,
        draw: &FullscreenDraw<'_>,
        target: RenderTarget,
    ) -> Result<(), BackendError> {
        let formats = self.target_formats(target)?;

        // Declared inputs first, then textures passed as parameters.
        let mut slots: Vec<(String, Option<TextureHandle>)> = draw
            .textures
            .iter()
            .map(|(name, handle)| (name.clone(), *handle))
            .collect();
        for (name, value) in draw.uniforms {
            if let UniformValue::Texture(handle) = value {
                slots.push((name.clone(), Some(*handle)));
            }
        }
        let mut kinds = Vec::with_capacity(slots.len());
        for (_, handle) in &slots {
            kinds.push(match handle {
                Some(handle) => SlotKind::of(self.gpu_texture(*handle)?.format),
                None => SlotKind::Filterable,
            });
        }

        let numeric: Vec<(&str, UniformValue)> = draw
            .uniforms
            .iter()
            .filter(|(_, value)| !matches!(value, UniformValue::Texture(_)))
            .map(|(name, value)| (name.as_str(), *value))
            .collect();
        let slot_decls: Vec<(&str, SlotKind)> = slots
            .iter()
            .zip(&kinds)
            .map(|((name, _), kind)| (name.as_str(), *kind))
            .collect();
        let prelude = filter_prelude(&slot_decls, &numeric, draw.defines);

        let key = PipelineKey {
            source: format!("{prelude}\n{}", draw.shader),
            slots: kinds.clone(),
            colors: formats.colors.clone(),
            depth: formats.depth,
        };
        self.ensure_pipeline(&key)?;

        let contents = pack_uniforms([formats.width as f32, formats.height as f32], &numeric);
        let uniform_buffer =
            self.gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Pinwheel Filter Uniforms"),
                    contents: bytemuck::cast_slice(&contents),
                    usage: wgpu::BufferUsages::UNIFORM,
                });

        let cached = self
            .pipelines
            .get(&key)
            .ok_or_else(|| BackendError::Shader(format!("pipeline for '{}' missing", draw.label)))?;

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: uniform_buffer.as_entire_binding(),
        }];
        for (index, ((_, handle), kind)) in slots.iter().zip(&kinds).enumerate() {
            let texture = match handle {
                Some(handle) => self.gpu_texture(*handle)?,
                None => &self.placeholder,
            };
            let sampler = match kind {
                SlotKind::Filterable => &texture.sampler,
                _ => &self.nearest_sampler,
            };
            let binding = 1 + 2 * index as u32;
            entries.push(wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: binding + 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
        }
        let bind_group = self
            .gpu
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Pinwheel Filter Bind Group"),
                layout: &cached.layout,
                entries: &entries,
            });

        let (colors, depth) = self.target_textures(target)?;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(draw.label),
            });
        {
            let color_attachments = color_attachments(&colors, draw.clear_color);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(draw.label),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth
                    .map(|texture| depth_attachment(texture, draw.clear_color.is_some())),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&cached.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn draw_scene(&mut self, draw: &SceneDraw<'_>, target: RenderTarget) -> Result<(), BackendError> {
        let mut renderer = self
            .scenes
            .remove(&draw.scene)
            .ok_or(BackendError::UnknownScene(draw.scene))?;
        let result = self.draw_scene_with(renderer.as_mut(), draw, target);
        self.scenes.insert(draw.scene, renderer);
        result
    }

    fn draw_scene_with(
        &self,
        renderer: &mut dyn SceneRenderer,
        draw: &SceneDraw<'_>,
        target: RenderTarget,
    ) -> Result<(), BackendError> {
        let formats = self.target_formats(target)?;
        let (colors, depth) = self.target_textures(target)?;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(draw.label),
            });

        if let Some(clear) = draw.clear_color {
            let color_attachments = color_attachments(&colors, Some(clear));
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pinwheel Scene Clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth.map(|texture| depth_attachment(texture, true)),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }

        let scene_target = SceneTarget {
            colors: colors
                .iter()
                .map(|texture| (&texture.view, texture.format))
                .collect(),
            depth: depth.map(|texture| (&texture.view, texture.format)),
            width: formats.width,
            height: formats.height,
        };
        renderer.render(&self.gpu, &mut encoder, &scene_target, draw)?;
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}

impl RenderBackend for WgpuBackend {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn create_texture(&mut self, params: &TextureParameters) -> Result<TextureHandle, BackendError> {
        self.allocate(params)
    }

    fn create_texture_with_data(
        &mut self,
        params: &TextureParameters,
        rgba: &[u8],
    ) -> Result<TextureHandle, BackendError> {
        let params = params
            .format(TextureFormat::Rgba)
            .pixel_type(PixelType::UnsignedByte);
        if rgba.len() != params.width as usize * params.height as usize * 4 {
            return Err(BackendError::InvalidSize {
                width: params.width,
                height: params.height,
            });
        }

        let handle = self.allocate(&params)?;
        let texture = self.gpu_texture(handle)?;
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * params.width),
                rows_per_image: Some(params.height),
            },
            wgpu::Extent3d {
                width: params.width,
                height: params.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(handle)
    }

    fn clear_texture(&mut self, handle: TextureHandle) -> Result<(), BackendError> {
        let texture = self.gpu_texture(handle)?;
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pinwheel Clear"),
            });
        if texture.format.is_depth_stencil_format() {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pinwheel Clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(depth_attachment(texture, true)),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        } else {
            let color_attachments = color_attachments(&[texture], Some([0.0; 4]));
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Pinwheel Clear"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn dispose_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            for attachments in self.frame_buffers.values_mut() {
                attachments.retain(|_, attached| *attached != handle);
            }
            texture.texture.destroy();
        }
    }

    fn create_frame_buffer(&mut self) -> Result<FrameBufferHandle, BackendError> {
        let frame_buffer = FrameBufferHandle::new(self.next_handle());
        self.frame_buffers.insert(frame_buffer, BTreeMap::new());
        Ok(frame_buffer)
    }

    fn dispose_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) {
        self.frame_buffers.remove(&frame_buffer);
        if self.bound == Some(frame_buffer) {
            self.bound = None;
        }
    }

    fn bind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) -> Result<(), BackendError> {
        if !self.frame_buffers.contains_key(&frame_buffer) {
            return Err(BackendError::UnknownFrameBuffer(frame_buffer));
        }
        self.bound = Some(frame_buffer);
        Ok(())
    }

    fn unbind_frame_buffer(&mut self, frame_buffer: FrameBufferHandle) {
        if self.bound == Some(frame_buffer) {
            self.bound = None;
        }
    }

    fn attach(
        &mut self,
        frame_buffer: FrameBufferHandle,
        texture: TextureHandle,
        attachment: Attachment,
    ) -> Result<(), BackendError> {
        self.gpu_texture(texture)?;
        self.frame_buffers
            .get_mut(&frame_buffer)
            .ok_or(BackendError::UnknownFrameBuffer(frame_buffer))?
            .insert(attachment, texture);
        Ok(())
    }

    fn detach_all(&mut self, frame_buffer: FrameBufferHandle) {
        if let Some(attachments) = self.frame_buffers.get_mut(&frame_buffer) {
            attachments.clear();
        }
    }

    fn draw(&mut self, call: &DrawCall<'_>, target: RenderTarget) -> Result<(), BackendError> {
        if target == RenderTarget::Default {
            self.ensure_default_target();
        }
        match call {
            DrawCall::Fullscreen(draw) => self.draw_fullscreen(draw, target),
            DrawCall::Scene(draw) => self.draw_scene(draw, target),
        }
    }
}

fn color_attachments<'a>(
    colors: &[&'a GpuTexture],
    clear: Option<[f32; 4]>,
) -> Vec<Option<wgpu::RenderPassColorAttachment<'a>>> {
    let load = match clear {
        Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }),
        None => wgpu::LoadOp::Load,
    };
    colors
        .iter()
        .map(|texture| {
            Some(wgpu::RenderPassColorAttachment {
                view: &texture.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
        })
        .collect()
}

fn depth_attachment(texture: &GpuTexture, clear: bool) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    let store = wgpu::StoreOp::Store;
    wgpu::RenderPassDepthStencilAttachment {
        view: &texture.view,
        depth_ops: Some(wgpu::Operations {
            load: if clear {
                wgpu::LoadOp::Clear(1.0)
            } else {
                wgpu::LoadOp::Load
            },
            store,
        }),
        stencil_ops: texture.format.has_stencil_aspect().then_some(wgpu::Operations {
            load: if clear {
                wgpu::LoadOp::Clear(0)
            } else {
                wgpu::LoadOp::Load
            },
            store,
        }),
    }
}

fn create_gpu_texture(
    device: &wgpu::Device,
    label: &str,
    params: &TextureParameters,
) -> GpuTexture {
    create_gpu_texture_with_format(device, label, params, texture_format(params))
}

fn create_gpu_texture_with_format(
    device: &wgpu::Device,
    label: &str,
    params: &TextureParameters,
    format: wgpu::TextureFormat,
) -> GpuTexture {
    let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
    if !format.is_depth_stencil_format() {
        usage |= wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: params.width,
            height: params.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = device.create_sampler(&sampler_descriptor(params));
    GpuTexture {
        texture,
        view,
        sampler,
        format,
        width: params.width,
        height: params.height,
    }
}

/// The wgpu format for a parameter set.
///
/// RGB has no three-channel equivalent and is stored as RGBA. Luminance and
/// alpha map to single-channel formats.
fn texture_format(params: &TextureParameters) -> wgpu::TextureFormat {
    use wgpu::TextureFormat as F;

    match (params.format, params.pixel_type) {
        (TextureFormat::DepthStencil, _) => F::Depth24PlusStencil8,
        (TextureFormat::DepthComponent, PixelType::Float) => F::Depth32Float,
        (TextureFormat::DepthComponent, _) => F::Depth24Plus,
        (TextureFormat::Rgba | TextureFormat::Rgb, PixelType::UnsignedByte) => F::Rgba8Unorm,
        (TextureFormat::Rgba | TextureFormat::Rgb, PixelType::UnsignedShort | PixelType::HalfFloat) => {
            F::Rgba16Float
        }
        (TextureFormat::Rgba | TextureFormat::Rgb, _) => F::Rgba32Float,
        (TextureFormat::LuminanceAlpha, PixelType::UnsignedByte) => F::Rg8Unorm,
        (TextureFormat::LuminanceAlpha, PixelType::UnsignedShort | PixelType::HalfFloat) => {
            F::Rg16Float
        }
        (TextureFormat::LuminanceAlpha, _) => F::Rg32Float,
        (TextureFormat::Alpha | TextureFormat::Luminance, PixelType::UnsignedByte) => F::R8Unorm,
        (TextureFormat::Alpha | TextureFormat::Luminance, PixelType::UnsignedShort | PixelType::HalfFloat) => {
            F::R16Float
        }
        (TextureFormat::Alpha | TextureFormat::Luminance, _) => F::R32Float,
    }
}

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter_mode(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest | FilterMode::NearestMipmapNearest | FilterMode::NearestMipmapLinear => {
            wgpu::FilterMode::Nearest
        }
        _ => wgpu::FilterMode::Linear,
    }
}

fn sampler_descriptor(params: &TextureParameters) -> wgpu::SamplerDescriptor<'static> {
    let mag_filter = filter_mode(params.mag_filter);
    let min_filter = filter_mode(params.min_filter);
    // Anisotropy is only valid when every filter is linear.
    let anisotropy_clamp = if mag_filter == wgpu::FilterMode::Linear
        && min_filter == wgpu::FilterMode::Linear
        && params.anisotropic > 1
    {
        params.anisotropic.min(16) as u16
    } else {
        1
    };
    let mipmap_filter = if anisotropy_clamp > 1 {
        wgpu::FilterMode::Linear
    } else {
        wgpu::FilterMode::Nearest
    };

    wgpu::SamplerDescriptor {
        label: Some("Pinwheel Sampler"),
        address_mode_u: address_mode(params.wrap_s),
        address_mode_v: address_mode(params.wrap_t),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter,
        min_filter,
        mipmap_filter,
        anisotropy_clamp,
        ..Default::default()
    }
}

fn wgsl_uniform_type(value: &UniformValue) -> &'static str {
    match value {
        UniformValue::Int(_) => "i32",
        UniformValue::Vec2(_) => "vec2<f32>",
        UniformValue::Vec3(_) => "vec3<f32>",
        UniformValue::Vec4(_) => "vec4<f32>",
        UniformValue::Float(_) | UniformValue::Texture(_) => "f32",
    }
}

/// Generates the WGSL declarations in front of a filter's fragment source.
fn filter_prelude(
    slots: &[(&str, SlotKind)],
    uniforms: &[(&str, UniformValue)],
    defines: &BTreeMap<String, String>,
) -> String {
    let mut out = String::from(concat!(
        "struct VertexOutput {\n",
        "    @builtin(position) position: vec4<f32>,\n",
        "    @location(0) uv: vec2<f32>,\n",
        "}\n\n",
        "@vertex\n",
        "fn vs(@builtin(vertex_index) index: u32) -> VertexOutput {\n",
        "    let corner = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));\n",
        "    var out: VertexOutput;\n",
        "    out.position = vec4<f32>(corner * 2.0 - 1.0, 0.0, 1.0);\n",
        "    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);\n",
        "    return out;\n",
        "}\n\n",
        "struct Params {\n",
        "    @size(16) target_size: vec2<f32>,\n",
    ));

    for (name, value) in uniforms {
        let _ = writeln!(out, "    @size(16) {}: {},", name, wgsl_uniform_type(value));
    }
    out.push_str("}\n\n@group(0) @binding(0) var<uniform> params: Params;\n");

    for (index, (name, kind)) in slots.iter().enumerate() {
        let binding = 1 + 2 * index;
        let _ = writeln!(
            out,
            "@group(0) @binding({binding}) var {name}: {};",
            kind.wgsl_type()
        );
        let _ = writeln!(
            out,
            "@group(0) @binding({}) var {name}_sampler: sampler;",
            binding + 1
        );
    }

    for (symbol, value) in defines {
        let value = if value.is_empty() { "1" } else { value.as_str() };
        let _ = writeln!(out, "const {symbol} = {value};");
    }
    for (name, _) in slots {
        let flag = format!("{}_ENABLED", name.to_uppercase());
        if !defines.contains_key(&flag) {
            let _ = writeln!(out, "const {flag} = 0;");
        }
    }
    out
}

/// Packs the target size and numeric uniforms, one 16-byte slot each.
fn pack_uniforms(target_size: [f32; 2], uniforms: &[(&str, UniformValue)]) -> Vec<[u32; 4]> {
    let mut slots = Vec::with_capacity(uniforms.len() + 1);
    slots.push([target_size[0].to_bits(), target_size[1].to_bits(), 0, 0]);
    for (_, value) in uniforms {
        slots.push(match value {
            UniformValue::Int(x) => [*x as u32, 0, 0, 0],
            other => other.as_vec4().unwrap_or([0.0; 4]).map(f32::to_bits),
        });
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_follow_channels_and_precision() {
        let rgba = TextureParameters::default();
        assert_eq!(texture_format(&rgba), wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(
            texture_format(&rgba.pixel_type(PixelType::HalfFloat)),
            wgpu::TextureFormat::Rgba16Float
        );
        assert_eq!(
            texture_format(&rgba.format(TextureFormat::Luminance).pixel_type(PixelType::Float)),
            wgpu::TextureFormat::R32Float
        );
        assert_eq!(
            texture_format(&rgba.format(TextureFormat::DepthStencil)),
            wgpu::TextureFormat::Depth24PlusStencil8
        );
    }

    #[test]
    fn slot_kinds_follow_filterability() {
        assert_eq!(SlotKind::of(wgpu::TextureFormat::Rgba16Float), SlotKind::Filterable);
        assert_eq!(SlotKind::of(wgpu::TextureFormat::Rgba32Float), SlotKind::Unfilterable);
        assert_eq!(SlotKind::of(wgpu::TextureFormat::Depth24Plus), SlotKind::Depth);
    }

    #[test]
    fn anisotropy_needs_linear_filters() {
        let params = TextureParameters::default()
            .anisotropic(8)
            .filter(FilterMode::Linear, FilterMode::Linear);
        assert_eq!(sampler_descriptor(&params).anisotropy_clamp, 8);

        let nearest = params.filter(FilterMode::Nearest, FilterMode::Linear);
        assert_eq!(sampler_descriptor(&nearest).anisotropy_clamp, 1);

        let repeat = params.wrap(WrapMode::MirroredRepeat);
        assert_eq!(
            sampler_descriptor(&repeat).address_mode_u,
            wgpu::AddressMode::MirrorRepeat
        );
    }

    #[test]
    fn prelude_declares_slots_params_and_flags() {
        let mut defines = BTreeMap::new();
        defines.insert("RADIUS".to_string(), "4".to_string());
        defines.insert("TEXTURE_ENABLED".to_string(), "1".to_string());

        let prelude = filter_prelude(
            &[("mask", SlotKind::Filterable), ("texture", SlotKind::Filterable), ("depth", SlotKind::Depth)],
            &[("blurSize", UniformValue::Float(2.0)), ("steps", UniformValue::Int(3))],
            &defines,
        );

        assert!(prelude.contains("@size(16) blurSize: f32,"));
        assert!(prelude.contains("@size(16) steps: i32,"));
        assert!(prelude.contains("@group(0) @binding(1) var mask: texture_2d<f32>;"));
        assert!(prelude.contains("@group(0) @binding(4) var texture_sampler: sampler;"));
        assert!(prelude.contains("@group(0) @binding(5) var depth: texture_depth_2d;"));
        assert!(prelude.contains("const RADIUS = 4;"));
        assert!(prelude.contains("const TEXTURE_ENABLED = 1;"));
        assert!(prelude.contains("const MASK_ENABLED = 0;"));
        assert!(!prelude.contains("const TEXTURE_ENABLED = 0;"));
    }

    #[test]
    fn uniforms_pack_into_sixteen_byte_slots() {
        let packed = pack_uniforms(
            [640.0, 480.0],
            &[
                ("a", UniformValue::Vec3([1.0, 2.0, 3.0])),
                ("b", UniformValue::Int(-1)),
            ],
        );

        assert_eq!(packed.len(), 3);
        assert_eq!(f32::from_bits(packed[0][1]), 480.0);
        assert_eq!(f32::from_bits(packed[1][2]), 3.0);
        assert_eq!(packed[2][0] as i32, -1);
        assert_eq!(bytemuck::cast_slice::<[u32; 4], u8>(&packed).len(), 48);
    }
}
