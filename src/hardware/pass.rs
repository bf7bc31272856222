//! Ray-query compute pass writing into a storage texture, then a fullscreen
//! blit of that texture onto the surface.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::{camera::SceneConstants, scene::Scene};

use super::context::WgpuContext;

/// Must match `@workgroup_size` in `raytrace.wgsl`.
const WORKGROUP_SIZE: u32 = 8;
const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Uniform read by the trace shader.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameUniform {
    pub constants: SceneConstants,
    pub background: [f32; 4],
}

impl FrameUniform {
    pub fn new(constants: SceneConstants, background: [f32; 3]) -> Self {
        Self {
            constants,
            background: [background[0], background[1], background[2], 1.0],
        }
    }
}

pub struct RayQueryPass {
    trace_pipeline: wgpu::ComputePipeline,
    blit_pipeline: wgpu::RenderPipeline,
    frame_buffer: wgpu::Buffer,
    mesh_constants: wgpu::Buffer,
    instance_meshes: wgpu::Buffer,
    sampler: wgpu::Sampler,
    output_view: wgpu::TextureView,
    trace_bind_group: Option<wgpu::BindGroup>,
    blit_bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl RayQueryPass {
    pub fn new(
        ctx: &WgpuContext,
        scene: &Scene<WgpuContext>,
        surface_format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> Self {
        let device = &ctx.device;

        let trace_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Trace Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("raytrace.wgsl").into()),
        });
        let trace_pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Trace Pipeline"),
            layout: None,
            module: &trace_shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let blit_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Blit Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("blit.wgsl").into()),
        });
        let blit_pipeline = mk_blit_pipeline(device, &blit_shader, surface_format);

        let frame_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Frame Uniform Buffer"),
            size: std::mem::size_of::<FrameUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // storage bindings may not be empty
        let mut mesh_constants: Vec<u8> = bytemuck::cast_slice(scene.mesh_constants()).to_vec();
        mesh_constants.resize(mesh_constants.len().max(16), 0);
        let mesh_constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Mesh Constants Buffer"),
            contents: &mesh_constants,
            usage: wgpu::BufferUsages::STORAGE,
        });

        let mut instance_meshes: Vec<u32> = scene
            .instances()
            .iter()
            .map(|record| record.hit_group_contribution())
            .collect();
        if instance_meshes.is_empty() {
            instance_meshes.push(0);
        }
        let instance_meshes = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Instance Mesh Buffer"),
            contents: bytemuck::cast_slice(&instance_meshes),
            usage: wgpu::BufferUsages::STORAGE,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let output_view = create_output(device, width, height);
        let blit_bind_group = mk_blit_bind_group(device, &blit_pipeline, &output_view, &sampler);
        let mut pass = Self {
            trace_pipeline,
            blit_pipeline,
            frame_buffer,
            mesh_constants,
            instance_meshes,
            sampler,
            output_view,
            trace_bind_group: None,
            blit_bind_group,
            width,
            height,
        };
        pass.trace_bind_group = pass.mk_trace_bind_group(device, scene);
        pass
    }

    /// Recreates the output texture and everything bound to it.
    pub fn resize(&mut self, ctx: &WgpuContext, scene: &Scene<WgpuContext>, width: u32, height: u32) {
        let device = &ctx.device;
        self.width = width;
        self.height = height;
        self.output_view = create_output(device, width, height);
        self.blit_bind_group =
            mk_blit_bind_group(device, &self.blit_pipeline, &self.output_view, &self.sampler);
        self.trace_bind_group = self.mk_trace_bind_group(device, scene);
    }

    pub fn update(&self, queue: &wgpu::Queue, frame: &FrameUniform) {
        queue.write_buffer(&self.frame_buffer, 0, bytemuck::cast_slice(&[*frame]));
    }

    /// Traces into the output texture and draws it onto `target`. Scenes
    /// without a top level only clear to `background`.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView, background: wgpu::Color) {
        if let Some(bind_group) = &self.trace_bind_group {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Trace Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.trace_pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.dispatch_workgroups(
                self.width.div_ceil(WORKGROUP_SIZE),
                self.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(background),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if self.trace_bind_group.is_some() {
            pass.set_pipeline(&self.blit_pipeline);
            pass.set_bind_group(0, &self.blit_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
    }

    fn mk_trace_bind_group(&self, device: &wgpu::Device, scene: &Scene<WgpuContext>) -> Option<wgpu::BindGroup> {
        let (Some(buffers), Some(top_level)) = (scene.buffers(), scene.top_level()) else {
            return None;
        };
        Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Trace Bind Group"),
            layout: &self.trace_pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::AccelerationStructure(&top_level.tlas),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffers.vertex_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffers.index_buffer.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.mesh_constants.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.instance_meshes.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: self.frame_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: wgpu::BindingResource::TextureView(&self.output_view),
                },
            ],
        }))
    }
}

fn create_output(device: &wgpu::Device, width: u32, height: u32) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Raytracing Output"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn mk_blit_bind_group(
    device: &wgpu::Device,
    pipeline: &wgpu::RenderPipeline,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Blit Bind Group"),
        layout: &pipeline.get_bind_group_layout(0),
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn mk_blit_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    color_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        cache: None,
        label: Some("Blit Pipeline"),
        layout: None,
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: color_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        multiview: None,
    })
}
