//! wgpu implementation of [`GraphicsContext`] using ray-query acceleration
//! structures.
//!
//! wgpu manages build scratch memory, instance upload and acceleration
//! structure barriers itself, so scratch buffers here are placeholders and the
//! barrier only has to keep the recording order.

use std::{collections::HashMap, iter, time::Duration};

use wgpu::util::DeviceExt;

use crate::{
    acceleration::InstanceRecord,
    context::{
        BufferUsage, BufferView, ContextError, DescriptorHeap, DescriptorIndex, GeometryDesc,
        GraphicsContext, PrebuildInfo, Result,
    },
};

const DESCRIPTOR_CAPACITY: u32 = 64;
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
}

#[derive(Debug)]
pub struct WgpuBottomLevel {
    /// `None` for geometry without triangles, which is never instanced.
    pub blas: Option<wgpu::Blas>,
}

#[derive(Debug)]
pub struct WgpuTopLevel {
    pub tlas: wgpu::Tlas,
}

pub struct WgpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    encoder: Option<wgpu::CommandEncoder>,
    descriptors: DescriptorHeap,
    views: HashMap<DescriptorIndex, BufferView>,
}

impl WgpuContext {
    /// The features a device needs for this context.
    pub fn required_features() -> wgpu::Features {
        wgpu::Features::EXPERIMENTAL_RAY_QUERY
    }

    /// Opens a raytracing-capable device on `adapter`.
    pub async fn new(adapter: &wgpu::Adapter) -> Result<Self> {
        if !adapter.features().contains(Self::required_features()) {
            log::error!("adapter {:?} has no ray query support", adapter.get_info().name);
            return Err(ContextError::RaytracingUnsupported);
        }
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("raytracing device"),
                required_features: Self::required_features(),
                required_limits: adapter.limits(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| ContextError::ResourceCreation {
                what: "device".into(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_device(device, queue))
    }

    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            encoder: None,
            descriptors: DescriptorHeap::new(DESCRIPTOR_CAPACITY),
            views: HashMap::new(),
        }
    }

    pub fn descriptor_view(&self, index: DescriptorIndex) -> Option<BufferView> {
        self.views.get(&index).copied()
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Acceleration Structure Encoder"),
                })
        })
    }
}

impl GraphicsContext for WgpuContext {
    type Buffer = WgpuBuffer;
    type BottomLevel = WgpuBottomLevel;
    type TopLevel = WgpuTopLevel;

    fn create_buffer(&mut self, label: &str, contents: &[u8], usage: BufferUsage) -> Result<WgpuBuffer> {
        let usage = match usage {
            BufferUsage::Geometry => {
                wgpu::BufferUsages::BLAS_INPUT | wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST
            }
            BufferUsage::Instances => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferUsage::Scratch => wgpu::BufferUsages::STORAGE,
        };
        // wgpu rejects empty storage bindings
        let contents = if contents.is_empty() { &[0u8; 4][..] } else { contents };
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents,
            usage,
        });
        Ok(WgpuBuffer { buffer })
    }

    fn create_scratch_buffer(&mut self, label: &str, _size: u64) -> Result<WgpuBuffer> {
        self.create_buffer(label, &[], BufferUsage::Scratch)
    }

    fn release_buffer(&mut self, buffer: WgpuBuffer) -> Result<()> {
        // wgpu keeps the allocation alive until submitted work using it is done
        drop(buffer);
        Ok(())
    }

    fn allocate_descriptor(&mut self, _buffer: &WgpuBuffer, view: BufferView) -> Result<DescriptorIndex> {
        let index = self.descriptors.allocate()?;
        self.views.insert(index, view);
        Ok(index)
    }

    fn release_descriptor(&mut self, index: DescriptorIndex) -> Result<()> {
        self.descriptors.release(index)?;
        self.views.remove(&index);
        Ok(())
    }

    fn bottom_level_prebuild_info(&self, _geometry: &GeometryDesc) -> PrebuildInfo {
        PrebuildInfo::default()
    }

    fn top_level_prebuild_info(&self, _instance_count: u32) -> PrebuildInfo {
        PrebuildInfo::default()
    }

    fn build_bottom_level(
        &mut self,
        label: &str,
        geometry: &GeometryDesc,
        vertex_buffer: &WgpuBuffer,
        index_buffer: &WgpuBuffer,
        _scratch: &WgpuBuffer,
    ) -> Result<WgpuBottomLevel> {
        if geometry.triangle_count() == 0 || geometry.vertex_count == 0 {
            log::warn!("`{label}` has no triangles, it will not be instanced");
            return Ok(WgpuBottomLevel { blas: None });
        }

        let size = wgpu::BlasTriangleGeometrySizeDescriptor {
            vertex_format: wgpu::VertexFormat::Float32x3,
            vertex_count: geometry.vertex_count,
            index_format: Some(wgpu::IndexFormat::Uint16),
            index_count: Some(geometry.triangle_count() * 3),
            flags: wgpu::AccelerationStructureGeometryFlags::OPAQUE,
        };
        let blas = self.device.create_blas(
            &wgpu::CreateBlasDescriptor {
                label: Some(label),
                flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
                update_mode: wgpu::AccelerationStructureUpdateMode::Build,
            },
            wgpu::BlasGeometrySizeDescriptors::Triangles {
                descriptors: vec![size.clone()],
            },
        );

        let entry = wgpu::BlasBuildEntry {
            blas: &blas,
            geometry: wgpu::BlasGeometries::TriangleGeometries(vec![wgpu::BlasTriangleGeometry {
                size: &size,
                vertex_buffer: &vertex_buffer.buffer,
                first_vertex: (geometry.vertex_buffer_offset / geometry.vertex_stride) as u32,
                vertex_stride: geometry.vertex_stride,
                index_buffer: Some(&index_buffer.buffer),
                first_index: Some((geometry.index_buffer_offset / geometry.index_format.size()) as u32),
                transform_buffer: None,
                transform_buffer_offset: None,
            }]),
        };
        self.encoder()
            .build_acceleration_structures(iter::once(&entry), iter::empty());
        Ok(WgpuBottomLevel { blas: Some(blas) })
    }

    fn acceleration_structure_barrier(&mut self) {
        log::trace!("acceleration structure barrier");
    }

    fn build_top_level(
        &mut self,
        label: &str,
        instances: &[InstanceRecord],
        _instance_buffer: &WgpuBuffer,
        bottom_levels: &[WgpuBottomLevel],
        _scratch: &WgpuBuffer,
    ) -> Result<WgpuTopLevel> {
        let mut tlas = self.device.create_tlas(&wgpu::CreateTlasDescriptor {
            label: Some(label),
            max_instances: instances.len().max(1) as u32,
            flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
            update_mode: wgpu::AccelerationStructureUpdateMode::Build,
        });

        for (slot, record) in instances.iter().enumerate() {
            let bottom_level = bottom_levels
                .get(record.acceleration_structure as usize)
                .ok_or_else(|| ContextError::InvalidGeometry {
                    label: label.to_string(),
                    reason: format!(
                        "instance {} references bottom level {}",
                        record.instance_id(),
                        record.acceleration_structure
                    ),
                })?;
            let Some(blas) = &bottom_level.blas else {
                continue;
            };
            let transform: [f32; 12] = bytemuck::cast(record.transform);
            // ray queries have no hit groups, the contribution is kept as custom data
            tlas[slot] = Some(wgpu::TlasInstance::new(
                blas,
                transform,
                record.hit_group_contribution(),
                record.mask(),
            ));
        }

        self.encoder()
            .build_acceleration_structures(iter::empty(), iter::once(&tlas));
        Ok(WgpuTopLevel { tlas })
    }

    fn release_bottom_level(&mut self, structure: WgpuBottomLevel) -> Result<()> {
        drop(structure);
        Ok(())
    }

    fn release_top_level(&mut self, structure: WgpuTopLevel) -> Result<()> {
        drop(structure);
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(iter::once(encoder.finish()));
        }
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(WAIT_TIMEOUT),
            })
            .map_err(|e| ContextError::Device(e.to_string()))?;
        Ok(())
    }
}
