use std::{borrow::Cow, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;
use web_time::Instant;
use wgpu::{PollType, util::DeviceExt};

use crate::{
    atlas::{Atlas, AtlasLayout},
    compositor::Frame,
    params::{MarchConfig, RenderParameters},
    renderer::{RenderError, check_surface},
    volume::Volume,
};

const WORKGROUP_SIZE: u32 = 8;

pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WGPU {
    /// Requests the default adapter and a device with its full limits.
    pub async fn request() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .map_err(|e| RenderError::UnsupportedSurface(e.to_string()))?;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Ray March Device"),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| RenderError::UnsupportedSurface(e.to_string()))?;
        Ok(Self { device, queue })
    }
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Uniforms {
    output_width: u32,
    output_height: u32,
    slice_width: u32,
    slice_height: u32,
    depth: u32,
    slices_per_row: u32,
    atlas_width: u32,
    has_volume: u32,
    max_steps: u32,
    _padding: [u32; 3],
    threshold: f32,
    opacity: f32,
    window_level: f32,
    window_width: f32,
    rotation_vertical: f32,
    rotation_horizontal: f32,
    zoom: f32,
    step_size: f32,
    opacity_cutoff: f32,
    alpha_scale: f32,
    edge_clamp: f32,
    fov_y: f32,
}

struct GpuAtlas {
    buffer: wgpu::Buffer,
    layout: Option<AtlasLayout>,
}

/// Runs the ray marcher as a compute shader over the atlas held in a
/// storage buffer.
pub struct GpuCompositor {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    atlas: RwLock<Arc<GpuAtlas>>,
    config: MarchConfig,
}

impl GpuCompositor {
    pub fn new(wgpu: WGPU, config: MarchConfig) -> Self {
        let WGPU { device, queue } = wgpu;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Ray March Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/ray_march.wgsl"
            ))),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Ray March Bind Group Layout"),
            entries: &[
                // Atlas
                storage(0, true),
                // Output buffer
                storage(1, false),
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Ray March Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Ray March Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let empty = Self::upload(&device, &[0; 4], None);

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            atlas: RwLock::new(Arc::new(empty)),
            config,
        }
    }

    fn upload(device: &wgpu::Device, bytes: &[u8], layout: Option<AtlasLayout>) -> GpuAtlas {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Atlas Buffer"),
            contents: bytes,
            usage: wgpu::BufferUsages::STORAGE,
        });
        GpuAtlas { buffer, layout }
    }

    /// Packs and uploads `volume`, replacing the atlas used by later frames.
    pub fn load(&self, volume: &Volume) {
        let start = Instant::now();
        let atlas = Atlas::pack(volume);
        let mut bytes: Vec<u8> = atlas.data().iter().copied().collect();
        // Storage buffers are read as whole words.
        bytes.resize(bytes.len().next_multiple_of(4).max(4), 0);

        let uploaded = Self::upload(&self.device, &bytes, Some(*atlas.layout()));
        *self.atlas.write() = Arc::new(uploaded);
        debug!(bytes = bytes.len(), elapsed = ?start.elapsed(), "uploaded atlas");
    }

    pub fn unload(&self) {
        *self.atlas.write() = Arc::new(Self::upload(&self.device, &[0; 4], None));
    }

    fn uniforms(&self, layout: Option<&AtlasLayout>, params: &RenderParameters, width: u32, height: u32) -> Uniforms {
        let config = &self.config;
        let (slice_width, slice_height, depth, slices_per_row, atlas_width) = layout
            .map(|l| (l.slice_width, l.slice_height, l.depth, l.slices_per_row, l.atlas_width))
            .unwrap_or_default();
        Uniforms {
            output_width: width,
            output_height: height,
            slice_width: slice_width as u32,
            slice_height: slice_height as u32,
            depth: depth as u32,
            slices_per_row: slices_per_row as u32,
            atlas_width: atlas_width as u32,
            has_volume: layout.is_some() as u32,
            max_steps: config.max_steps,
            _padding: [0; 3],
            threshold: params.threshold,
            opacity: params.opacity,
            window_level: params.window_level,
            window_width: params.window_width,
            rotation_vertical: params.rotation_vertical,
            rotation_horizontal: params.rotation_horizontal,
            zoom: params.zoom,
            step_size: config.step_size,
            opacity_cutoff: config.opacity_cutoff,
            alpha_scale: config.alpha_scale,
            edge_clamp: config.edge_clamp,
            fov_y: config.fov_y,
        }
    }

    pub async fn render(
        &self,
        params: &RenderParameters,
        width: u32,
        height: u32,
    ) -> Result<Frame, RenderError> {
        check_surface(width, height)?;
        let start = Instant::now();
        let atlas = self.atlas.read().clone();

        let uniforms = self.uniforms(atlas.layout.as_ref(), params, width, height);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Uniform Buffer"),
                contents: bytemuck::bytes_of(&uniforms),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let output_size = (width * height) as u64 * std::mem::size_of::<u32>() as u64;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Output Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Ray March Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: atlas.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Ray March Encoder"),
            });
        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Ray March Pass"),
                timestamp_writes: None,
            });
            compute_pass.set_pipeline(&self.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            let dispatch_x = width.div_ceil(WORKGROUP_SIZE);
            let dispatch_y = height.div_ceil(WORKGROUP_SIZE);
            compute_pass.dispatch_workgroups(dispatch_x, dispatch_y, 1);
        }
        encoder.copy_buffer_to_buffer(&output_buffer, 0, &staging_buffer, 0, output_size);
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        receiver
            .await
            .map_err(|e| RenderError::Readback(e.to_string()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;

        // Each word is packed RGBA8, little endian, so the bytes are already
        // in pixel order.
        let data = buffer_slice.get_mapped_range();
        let pixels = data.to_vec();
        drop(data);
        staging_buffer.unmap();

        debug!(width, height, elapsed = ?start.elapsed(), "rendered frame on GPU");
        Ok(Frame::new(width, height, pixels))
    }
}
