use crate::renderer::{
    atlas::GpuAtlas,
    targets::{COLOR_FORMAT, DEPTH_FORMAT},
};
use crate::data::types::{ImpostorInstanceRaw, ImpostorParamsStd140 as ImpostorParams};
use wgpu::util::DeviceExt;

/// Default alpha below which blended sprite texels are discarded.
pub const ALPHA_CUTOFF: f32 = 0.5;

/// Camera-facing billboards that blend three atlas sprites per instance.
pub struct ImpostorPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub batch_layout: wgpu::BindGroupLayout,
    quad_vb: wgpu::Buffer,
}

/// Instances sharing one atlas, with their own parameter block.
pub struct ImpostorBatch {
    params: wgpu::Buffer,
    bind: wgpu::BindGroup,
    instances: wgpu::Buffer,
    capacity: u32,
    len: u32,
}

impl ImpostorPipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let batch_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Impostor Batch Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<ImpostorParams>() as u64,
                        ),
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Impostor WGSL"),
            source: wgpu::ShaderSource::Wgsl(IMPOSTOR_WGSL.into()),
        });

        // Billboard quad, corners in [-1,1]
        let quad_corners: [[f32; 2]; 6] = [
            [-1.0, -1.0],
            [1.0, -1.0],
            [1.0, 1.0],
            [-1.0, -1.0],
            [1.0, 1.0],
            [-1.0, 1.0],
        ];
        let quad_vb = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Impostor Quad VB"),
            contents: bytemuck::cast_slice(&quad_corners),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let vbuf_layouts = [
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<[f32; 2]>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &[wgpu::VertexAttribute {
                    shader_location: 0,
                    offset: 0,
                    format: wgpu::VertexFormat::Float32x2,
                }],
            },
            wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<ImpostorInstanceRaw>() as u64,
                step_mode: wgpu::VertexStepMode::Instance,
                attributes: &[
                    // position
                    wgpu::VertexAttribute {
                        shader_location: 1,
                        offset: 0,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                    // scale
                    wgpu::VertexAttribute {
                        shader_location: 2,
                        offset: 12,
                        format: wgpu::VertexFormat::Float32,
                    },
                    // face_indices
                    wgpu::VertexAttribute {
                        shader_location: 3,
                        offset: 16,
                        format: wgpu::VertexFormat::Uint32x3,
                    },
                    // face_weights
                    wgpu::VertexAttribute {
                        shader_location: 4,
                        offset: 28,
                        format: wgpu::VertexFormat::Float32x3,
                    },
                ],
            },
        ];

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Impostor Pipeline Layout"),
            bind_group_layouts: &[&batch_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Impostor Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: "vs_main",
                buffers: &vbuf_layouts,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: "fs_main",
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        Self {
            pipeline,
            batch_layout,
            quad_vb,
        }
    }

    /// Allocates a batch bound to `atlas` with room for `capacity` instances.
    pub fn create_batch(&self, device: &wgpu::Device, atlas: &GpuAtlas, capacity: u32) -> ImpostorBatch {
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Impostor Params"),
            size: std::mem::size_of::<ImpostorParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Impostor Batch Bind Group"),
            layout: &self.batch_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&atlas.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&atlas.sampler),
                },
            ],
        });
        let capacity = capacity.max(1);
        ImpostorBatch {
            params,
            bind,
            instances: instance_buffer(device, capacity),
            capacity,
            len: 0,
        }
    }

    pub fn draw_batch<'a>(&'a self, rpass: &mut wgpu::RenderPass<'a>, batch: &'a ImpostorBatch) {
        if batch.len == 0 {
            return;
        }
        rpass.set_pipeline(&self.pipeline);
        rpass.set_bind_group(0, &batch.bind, &[]);
        rpass.set_vertex_buffer(0, self.quad_vb.slice(..));
        rpass.set_vertex_buffer(1, batch.instances.slice(..));
        rpass.draw(0..6, 0..batch.len);
    }
}

fn instance_buffer(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Impostor Instance VB"),
        size: capacity as u64 * std::mem::size_of::<ImpostorInstanceRaw>() as u64,
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl ImpostorBatch {
    #[inline]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn write_params(&self, queue: &wgpu::Queue, params: &ImpostorParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Replaces the instance data, growing the buffer if needed.
    pub fn write_instances(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        instances: &[ImpostorInstanceRaw],
    ) {
        let n = instances.len() as u32;
        if n > self.capacity {
            self.capacity = n.next_power_of_two();
            self.instances = instance_buffer(device, self.capacity);
        }
        if n > 0 {
            queue.write_buffer(&self.instances, 0, bytemuck::cast_slice(instances));
        }
        self.len = n;
    }
}

pub const IMPOSTOR_WGSL: &str = r#"
struct ImpostorParams {
    view_proj: mat4x4<f32>,
    camera_right: vec3<f32>,
    sprites_per_side: f32,
    camera_up: vec3<f32>,
    placeholder: u32,
    cell_uv: f32,
    alpha_cutoff: f32,
    _pad: vec2<f32>,
};
@group(0) @binding(0) var<uniform> P: ImpostorParams;
@group(0) @binding(1) var atlas_tex: texture_2d<f32>;
@group(0) @binding(2) var atlas_smp: sampler;

struct VSOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) local_uv: vec2<f32>,
    @location(1) @interpolate(flat) face: vec3<u32>,
    @location(2) weights: vec3<f32>,
};

@vertex
fn vs_main(
    @location(0) corner: vec2<f32>,
    @location(1) position: vec3<f32>,
    @location(2) scale: f32,
    @location(3) face: vec3<u32>,
    @location(4) weights: vec3<f32>,
) -> VSOut {
    let world = position + (P.camera_right * corner.x + P.camera_up * corner.y) * scale;
    var out: VSOut;
    out.clip = P.view_proj * vec4<f32>(world, 1.0);
    // Sprite rows run top to bottom.
    out.local_uv = vec2<f32>(corner.x * 0.5 + 0.5, 0.5 - corner.y * 0.5);
    out.face = face;
    out.weights = weights;
    return out;
}

// Lattice index -> atlas UV. One sprite per lattice point, so the row
// stride is N+1 (not N); must match AtlasLayout::sprite_of.
fn sprite_uv(index: u32, local: vec2<f32>) -> vec2<f32> {
    let side = u32(P.sprites_per_side);
    let cell = vec2<f32>(f32(index % side), f32(index / side));
    // Inset half a texel's worth so linear filtering stays inside the sprite.
    let inset = clamp(local, vec2<f32>(0.002), vec2<f32>(0.998));
    return (cell + inset) * P.cell_uv;
}

@fragment
fn fs_main(in: VSOut) -> @location(0) vec4<f32> {
    let a = textureSample(atlas_tex, atlas_smp, sprite_uv(in.face.x, in.local_uv));
    let b = textureSample(atlas_tex, atlas_smp, sprite_uv(in.face.y, in.local_uv));
    let c = textureSample(atlas_tex, atlas_smp, sprite_uv(in.face.z, in.local_uv));

    if (P.placeholder != 0u) {
        let r = length(in.local_uv - vec2<f32>(0.5));
        if (r > 0.5) {
            discard;
        }
        return vec4<f32>(0.55, 0.6, 0.7, 0.35);
    }

    let texel = a * in.weights.x + b * in.weights.y + c * in.weights.z;
    if (texel.a < P.alpha_cutoff) {
        discard;
    }
    // Transparent texels are black, so renormalise colour by coverage.
    return vec4<f32>(texel.rgb / max(texel.a, 1e-4), 1.0);
}
"#;
