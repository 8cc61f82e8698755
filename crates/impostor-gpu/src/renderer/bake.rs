//! wgpu implementation of the bake surface.

use super::{
    context::GfxContext,
    readback::Readback,
    targets::{Targets, COLOR_FORMAT, DEPTH_FORMAT},
};
use crate::data::types::{BakeUniformStd140 as BakeUniform, BakeVertex};
use async_trait::async_trait;
use glam::Vec3;
use image::RgbaImage;
use octahedral::soft::{BAKE_AMBIENT, BAKE_LIGHT_DIR};
use octahedral::{BakeBackend, BakeError, BakeScene, BakeView, CellError, ViewRenderer};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Bakes on the GPU. The pipeline is built once; every `prepare` uploads one
/// scene and allocates surfaces sized for its sprites.
pub struct WgpuBakeBackend {
    gfx: Arc<GfxContext>,
    pipeline: Arc<wgpu::RenderPipeline>,
    layout: wgpu::BindGroupLayout,
}

impl WgpuBakeBackend {
    pub fn new(gfx: Arc<GfxContext>) -> Self {
        let device = &gfx.device;

        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bake UBO Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<BakeUniform>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bake WGSL"),
            source: wgpu::ShaderSource::Wgsl(BAKE_WGSL.into()),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bake Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Bake Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<BakeVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x3,
                        1 => Float32x3,
                        2 => Float32x4
                    ],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                // Sources are not guaranteed to be closed or consistently wound.
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self {
            gfx,
            pipeline: Arc::new(pipeline),
            layout,
        }
    }
}

#[async_trait]
impl BakeBackend for WgpuBakeBackend {
    async fn prepare(
        &self,
        scene: &BakeScene,
        cell_px: u32,
    ) -> Result<Box<dyn ViewRenderer>, BakeError> {
        let max = self.gfx.max_texture_size();
        if cell_px == 0 || cell_px > max {
            return Err(BakeError::Surface(format!(
                "{cell_px}px sprite outside 1..={max}"
            )));
        }

        let (vertices, indices) = scene.flatten();
        let vertices: Vec<BakeVertex> = vertices.iter().map(BakeVertex::from).collect();
        let device = &self.gfx.device;

        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bake Vertex Buffer"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bake Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bake Uniform Buffer"),
            size: std::mem::size_of::<BakeUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bake Bind Group"),
            layout: &self.layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });
        let targets = Targets::new(device, cell_px, cell_px);
        let readback = Readback::new(device, cell_px, cell_px);

        if let Some(err) = device.pop_error_scope().await {
            return Err(BakeError::Surface(err.to_string()));
        }

        Ok(Box::new(WgpuViewRenderer {
            gfx: self.gfx.clone(),
            pipeline: self.pipeline.clone(),
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
            uniform_buffer,
            bind,
            targets,
            readback,
        }))
    }
}

/// Scene buffers and surfaces of one bake. Dropped when the bake ends.
pub struct WgpuViewRenderer {
    gfx: Arc<GfxContext>,
    pipeline: Arc<wgpu::RenderPipeline>,
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    uniform_buffer: wgpu::Buffer,
    bind: wgpu::BindGroup,
    targets: Targets,
    readback: Readback,
}

#[async_trait]
impl ViewRenderer for WgpuViewRenderer {
    async fn render_view(&mut self, view: &BakeView) -> Result<RgbaImage, CellError> {
        let light: Vec3 = BAKE_LIGHT_DIR.normalize();
        let uniform = BakeUniform {
            view_proj: view.view_proj(),
            light: light.extend(BAKE_AMBIENT).to_array(),
        };
        self.gfx
            .queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));

        let device = &self.gfx.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Bake View Encoder"),
        });
        {
            let mut pass = self.targets.begin_clear_pass(&mut encoder, "Bake View Pass");
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.bind, &[]);
            pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..self.index_count, 0, 0..1);
        }
        self.readback.copy_from(&mut encoder, &self.targets.color_tex);
        self.gfx.queue.submit(std::iter::once(encoder.finish()));

        if let Some(err) = device.pop_error_scope().await {
            return Err(CellError::new(view.index, err.to_string()));
        }

        self.readback
            .read(device)
            .await
            .map_err(|e| CellError::new(view.index, format!("{e:#}")))
    }
}

pub const BAKE_WGSL: &str = r#"
struct BakeUniform {
    view_proj: mat4x4<f32>,
    light: vec4<f32>,
};
@group(0) @binding(0) var<uniform> U: BakeUniform;

struct VSIn {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec4<f32>,
};

struct VSOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_main(v: VSIn) -> VSOut {
    var out: VSOut;
    out.clip = U.view_proj * vec4<f32>(v.position, 1.0);
    out.normal = v.normal;
    out.color = v.color;
    return out;
}

@fragment
fn fs_main(in: VSOut) -> @location(0) vec4<f32> {
    var n = in.normal;
    if (dot(n, n) > 1e-12) {
        n = normalize(n);
    }
    // Double-sided Lambert.
    let ambient = U.light.w;
    let lit = ambient + (1.0 - ambient) * abs(dot(n, U.light.xyz));
    return vec4<f32>(clamp(in.color.rgb * lit, vec3<f32>(0.0), vec3<f32>(1.0)), in.color.a);
}
"#;
