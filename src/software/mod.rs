//! CPU implementation of [`GraphicsContext`].
//!
//! Buffers are plain byte vectors. Builds are recorded as commands, handed
//! over by [`submit`](GraphicsContext::submit) and executed when the caller
//! waits, so the context enforces the same rules a GPU queue would: a
//! top-level build needs a barrier after the bottom-level builds it reads,
//! and nothing may be released while a recorded or submitted command still
//! references it. Every call is appended to an event log for inspection.
//!
//! Built top-level structures are [`InstanceBvh`]s and implement
//! [`Tracer`](crate::trace::Tracer).

pub mod bvh;

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use cgmath::{InnerSpace, Matrix, Matrix4, SquareMatrix, Transform, Vector3};

use crate::{
    acceleration::InstanceRecord,
    context::{
        BufferUsage, BufferView, ContextError, DescriptorHeap, DescriptorIndex, GeometryDesc,
        GraphicsContext, PrebuildInfo, Result,
    },
    software::bvh::{Aabb, Bvh, TriangleBvh},
    trace::{Hit, Ray, Tracer},
};

const DEFAULT_DESCRIPTOR_CAPACITY: u32 = 256;
/// Bytes per node or primitive reported by the prebuild queries.
const PREBUILD_ENTRY_SIZE: u64 = 64;

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SoftwareBuffer(u64);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SoftwareBottomLevel(u64);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SoftwareTopLevel(u64);

/// One entry of the context's event log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    CreateBuffer(String),
    ReleaseBuffer(String),
    AllocateDescriptor(DescriptorIndex),
    ReleaseDescriptor(DescriptorIndex),
    BuildBottomLevel(String),
    Barrier,
    BuildTopLevel(String),
    ReleaseBottomLevel(String),
    ReleaseTopLevel(String),
    Submit,
    WaitIdle,
}

struct BufferEntry {
    label: String,
    usage: BufferUsage,
    bytes: Vec<u8>,
}

struct BottomLevelEntry {
    label: String,
    built: Option<Arc<TriangleBvh>>,
}

struct TopLevelEntry {
    label: String,
    built: Option<Arc<InstanceBvh>>,
}

enum Command {
    BuildBottomLevel {
        target: u64,
        geometry: GeometryDesc,
        vertex_buffer: u64,
        index_buffer: u64,
        scratch: u64,
    },
    Barrier,
    BuildTopLevel {
        target: u64,
        instance_buffer: u64,
        instance_count: usize,
        bottom_levels: Vec<u64>,
        scratch: u64,
    },
}

impl Command {
    fn references(&self, id: u64) -> bool {
        match self {
            Command::BuildBottomLevel {
                target,
                vertex_buffer,
                index_buffer,
                scratch,
                ..
            } => [*target, *vertex_buffer, *index_buffer, *scratch].contains(&id),
            Command::Barrier => false,
            Command::BuildTopLevel {
                target,
                instance_buffer,
                bottom_levels,
                scratch,
                ..
            } => [*target, *instance_buffer, *scratch].contains(&id) || bottom_levels.contains(&id),
        }
    }
}

pub struct SoftwareContext {
    next_id: u64,
    buffers: HashMap<u64, BufferEntry>,
    bottom_levels: HashMap<u64, BottomLevelEntry>,
    top_levels: HashMap<u64, TopLevelEntry>,
    descriptors: DescriptorHeap,
    views: HashMap<DescriptorIndex, (u64, BufferView)>,
    recording: Vec<Command>,
    /// Bottom-level builds recorded since the last barrier.
    unordered: HashSet<u64>,
    in_flight: Vec<Vec<Command>>,
    events: Vec<Event>,
}

impl Default for SoftwareContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareContext {
    pub fn new() -> Self {
        Self::with_descriptor_capacity(DEFAULT_DESCRIPTOR_CAPACITY)
    }

    pub fn with_descriptor_capacity(capacity: u32) -> Self {
        Self {
            next_id: 0,
            buffers: HashMap::new(),
            bottom_levels: HashMap::new(),
            top_levels: HashMap::new(),
            descriptors: DescriptorHeap::new(capacity),
            views: HashMap::new(),
            recording: Vec::new(),
            unordered: HashSet::new(),
            in_flight: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_structures(&self) -> usize {
        self.bottom_levels.len() + self.top_levels.len()
    }

    pub fn descriptors(&self) -> &DescriptorHeap {
        &self.descriptors
    }

    pub fn buffer_usage(&self, buffer: &SoftwareBuffer) -> Option<BufferUsage> {
        self.buffers.get(&buffer.0).map(|entry| entry.usage)
    }

    pub fn buffer_bytes(&self, buffer: &SoftwareBuffer) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|entry| entry.bytes.as_slice())
    }

    /// The view placed in `index`.
    pub fn descriptor_view(&self, index: DescriptorIndex) -> Option<BufferView> {
        self.views.get(&index).map(|(_, view)| *view)
    }

    /// The completed top-level structure, once the batch building it has run.
    pub fn top_level(&self, structure: &SoftwareTopLevel) -> Option<Arc<InstanceBvh>> {
        self.top_levels.get(&structure.0)?.built.clone()
    }

    pub fn bottom_level(&self, structure: &SoftwareBottomLevel) -> Option<Arc<TriangleBvh>> {
        self.bottom_levels.get(&structure.0)?.built.clone()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_referenced(&self, id: u64) -> bool {
        self.recording
            .iter()
            .chain(self.in_flight.iter().flatten())
            .any(|command| command.references(id))
    }

    fn buffer(&self, buffer: &SoftwareBuffer) -> Result<&BufferEntry> {
        self.buffers.get(&buffer.0).ok_or(ContextError::UnknownHandle)
    }

    fn check_geometry(&self, label: &str, geometry: &GeometryDesc, vertices: &[u8], indices: &[u8]) -> Result<()> {
        let invalid = |reason: String| ContextError::InvalidGeometry {
            label: label.to_string(),
            reason,
        };
        if geometry.vertex_stride < 12 {
            return Err(invalid(format!("vertex stride {} is too small", geometry.vertex_stride)));
        }
        let vertex_end = match geometry.vertex_count {
            0 => geometry.vertex_buffer_offset,
            count => {
                geometry.vertex_buffer_offset + (u64::from(count) - 1) * geometry.vertex_stride + 12
            }
        };
        if vertex_end > vertices.len() as u64 {
            return Err(invalid(format!(
                "vertices end at byte {vertex_end}, buffer holds {}",
                vertices.len()
            )));
        }
        let index_end =
            geometry.index_buffer_offset + u64::from(geometry.index_count) * geometry.index_format.size();
        if index_end > indices.len() as u64 {
            return Err(invalid(format!(
                "indices end at byte {index_end}, buffer holds {}",
                indices.len()
            )));
        }
        if let Some(index) = read_indices(geometry, indices)
            .into_iter()
            .find(|&index| u32::from(index) >= geometry.vertex_count)
        {
            return Err(invalid(format!(
                "index {index} out of range for {} vertices",
                geometry.vertex_count
            )));
        }
        Ok(())
    }

    fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::BuildBottomLevel {
                target,
                geometry,
                vertex_buffer,
                index_buffer,
                ..
            } => {
                let vertices = &self.buffers.get(&vertex_buffer).ok_or(ContextError::UnknownHandle)?.bytes;
                let indices = &self.buffers.get(&index_buffer).ok_or(ContextError::UnknownHandle)?.bytes;
                let positions = read_positions(&geometry, vertices);
                let triangles = read_indices(&geometry, indices)
                    .chunks_exact(3)
                    .map(|tri| {
                        [
                            positions[tri[0] as usize],
                            positions[tri[1] as usize],
                            positions[tri[2] as usize],
                        ]
                    })
                    .collect();
                let entry = self.bottom_levels.get_mut(&target).ok_or(ContextError::UnknownHandle)?;
                entry.built = Some(Arc::new(TriangleBvh::new(triangles)));
            }
            Command::Barrier => {}
            Command::BuildTopLevel {
                target,
                instance_buffer,
                instance_count,
                bottom_levels,
                ..
            } => {
                let bytes = &self.buffers.get(&instance_buffer).ok_or(ContextError::UnknownHandle)?.bytes;
                let mut instances = Vec::with_capacity(instance_count);
                for chunk in bytes.chunks_exact(InstanceRecord::SIZE).take(instance_count) {
                    let record: InstanceRecord = bytemuck::pod_read_unaligned(chunk);
                    let id = bottom_levels
                        .get(record.acceleration_structure as usize)
                        .ok_or(ContextError::UnknownHandle)?;
                    let mesh = self
                        .bottom_levels
                        .get(id)
                        .and_then(|entry| entry.built.clone())
                        .ok_or(ContextError::UnknownHandle)?;
                    instances.push(SoftwareInstance::new(record, mesh));
                }
                let entry = self.top_levels.get_mut(&target).ok_or(ContextError::UnknownHandle)?;
                entry.built = Some(Arc::new(InstanceBvh::new(instances)));
            }
        }
        Ok(())
    }
}

/// Triangle list over `u16` indices, in whole triangles.
fn read_indices(geometry: &GeometryDesc, bytes: &[u8]) -> Vec<u16> {
    let start = geometry.index_buffer_offset as usize;
    let count = (geometry.triangle_count() * 3) as usize;
    bytes[start..start + count * 2]
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect()
}

fn read_positions(geometry: &GeometryDesc, bytes: &[u8]) -> Vec<Vector3<f32>> {
    (0..geometry.vertex_count as u64)
        .map(|i| {
            let start = (geometry.vertex_buffer_offset + i * geometry.vertex_stride) as usize;
            let position: [f32; 3] = bytemuck::pod_read_unaligned(&bytes[start..start + 12]);
            Vector3::from(position)
        })
        .collect()
}

impl GraphicsContext for SoftwareContext {
    type Buffer = SoftwareBuffer;
    type BottomLevel = SoftwareBottomLevel;
    type TopLevel = SoftwareTopLevel;

    fn create_buffer(&mut self, label: &str, contents: &[u8], usage: BufferUsage) -> Result<SoftwareBuffer> {
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            BufferEntry {
                label: label.to_string(),
                usage,
                bytes: contents.to_vec(),
            },
        );
        self.events.push(Event::CreateBuffer(label.to_string()));
        Ok(SoftwareBuffer(id))
    }

    fn create_scratch_buffer(&mut self, label: &str, size: u64) -> Result<SoftwareBuffer> {
        let bytes = usize::try_from(size).map_err(|_| ContextError::ResourceCreation {
            what: label.to_string(),
            reason: format!("{size} bytes do not fit in memory"),
        })?;
        self.create_buffer(label, &vec![0; bytes], BufferUsage::Scratch)
    }

    fn release_buffer(&mut self, buffer: SoftwareBuffer) -> Result<()> {
        let label = self.buffer(&buffer)?.label.clone();
        if self.is_referenced(buffer.0) || self.views.values().any(|(id, _)| *id == buffer.0) {
            return Err(ContextError::ResourceInFlight(label));
        }
        self.buffers.remove(&buffer.0);
        self.events.push(Event::ReleaseBuffer(label));
        Ok(())
    }

    fn allocate_descriptor(&mut self, buffer: &SoftwareBuffer, view: BufferView) -> Result<DescriptorIndex> {
        let length = self.buffer(buffer)?.bytes.len() as u64;
        let (needed, label) = match view {
            BufferView::Structured { stride, elements } => (u64::from(stride) * u64::from(elements), "structured"),
            BufferView::Raw { elements } => (4 * u64::from(elements), "raw"),
        };
        if needed > length {
            return Err(ContextError::ResourceCreation {
                what: format!("{label} view"),
                reason: format!("view covers {needed} bytes, buffer holds {length}"),
            });
        }
        let index = self.descriptors.allocate()?;
        self.views.insert(index, (buffer.0, view));
        self.events.push(Event::AllocateDescriptor(index));
        Ok(index)
    }

    fn release_descriptor(&mut self, index: DescriptorIndex) -> Result<()> {
        self.descriptors.release(index)?;
        self.views.remove(&index);
        self.events.push(Event::ReleaseDescriptor(index));
        Ok(())
    }

    fn bottom_level_prebuild_info(&self, geometry: &GeometryDesc) -> PrebuildInfo {
        let triangles = u64::from(geometry.triangle_count());
        PrebuildInfo {
            result_size: PREBUILD_ENTRY_SIZE * (2 * triangles + 1),
            scratch_size: PREBUILD_ENTRY_SIZE * triangles,
        }
    }

    fn top_level_prebuild_info(&self, instance_count: u32) -> PrebuildInfo {
        let instances = u64::from(instance_count);
        PrebuildInfo {
            result_size: PREBUILD_ENTRY_SIZE * (2 * instances + 1),
            scratch_size: PREBUILD_ENTRY_SIZE * instances,
        }
    }

    fn build_bottom_level(
        &mut self,
        label: &str,
        geometry: &GeometryDesc,
        vertex_buffer: &SoftwareBuffer,
        index_buffer: &SoftwareBuffer,
        scratch: &SoftwareBuffer,
    ) -> Result<SoftwareBottomLevel> {
        let vertices = &self.buffer(vertex_buffer)?.bytes;
        let indices = &self.buffer(index_buffer)?.bytes;
        self.check_geometry(label, geometry, vertices, indices)?;
        let needed = self.bottom_level_prebuild_info(geometry).scratch_size;
        if (self.buffer(scratch)?.bytes.len() as u64) < needed {
            return Err(ContextError::InvalidGeometry {
                label: label.to_string(),
                reason: format!("scratch buffer smaller than the {needed} bytes required"),
            });
        }

        let id = self.allocate_id();
        self.bottom_levels.insert(
            id,
            BottomLevelEntry {
                label: label.to_string(),
                built: None,
            },
        );
        self.recording.push(Command::BuildBottomLevel {
            target: id,
            geometry: *geometry,
            vertex_buffer: vertex_buffer.0,
            index_buffer: index_buffer.0,
            scratch: scratch.0,
        });
        self.unordered.insert(id);
        self.events.push(Event::BuildBottomLevel(label.to_string()));
        Ok(SoftwareBottomLevel(id))
    }

    fn acceleration_structure_barrier(&mut self) {
        self.unordered.clear();
        self.recording.push(Command::Barrier);
        self.events.push(Event::Barrier);
    }

    fn build_top_level(
        &mut self,
        label: &str,
        instances: &[InstanceRecord],
        instance_buffer: &SoftwareBuffer,
        bottom_levels: &[SoftwareBottomLevel],
        scratch: &SoftwareBuffer,
    ) -> Result<SoftwareTopLevel> {
        if bottom_levels.iter().any(|b| self.unordered.contains(&b.0)) {
            return Err(ContextError::MissingBarrier);
        }
        if let Some(b) = bottom_levels.iter().find(|b| !self.bottom_levels.contains_key(&b.0)) {
            log::error!("top level `{label}` references released bottom level {}", b.0);
            return Err(ContextError::UnknownHandle);
        }
        let invalid = |reason: String| ContextError::InvalidGeometry {
            label: label.to_string(),
            reason,
        };
        let uploaded = self.buffer(instance_buffer)?.bytes.len();
        if uploaded < instances.len() * InstanceRecord::SIZE {
            return Err(invalid(format!(
                "instance buffer holds {uploaded} bytes for {} instances",
                instances.len()
            )));
        }
        if let Some(record) = instances
            .iter()
            .find(|r| r.acceleration_structure as usize >= bottom_levels.len())
        {
            return Err(invalid(format!(
                "instance {} references bottom level {} of {}",
                record.instance_id(),
                record.acceleration_structure,
                bottom_levels.len()
            )));
        }
        let needed = self.top_level_prebuild_info(instances.len() as u32).scratch_size;
        if (self.buffer(scratch)?.bytes.len() as u64) < needed {
            return Err(invalid(format!("scratch buffer smaller than the {needed} bytes required")));
        }

        let id = self.allocate_id();
        self.top_levels.insert(
            id,
            TopLevelEntry {
                label: label.to_string(),
                built: None,
            },
        );
        self.recording.push(Command::BuildTopLevel {
            target: id,
            instance_buffer: instance_buffer.0,
            instance_count: instances.len(),
            bottom_levels: bottom_levels.iter().map(|b| b.0).collect(),
            scratch: scratch.0,
        });
        self.events.push(Event::BuildTopLevel(label.to_string()));
        Ok(SoftwareTopLevel(id))
    }

    fn release_bottom_level(&mut self, structure: SoftwareBottomLevel) -> Result<()> {
        let label = match self.bottom_levels.get(&structure.0) {
            Some(entry) => entry.label.clone(),
            None => return Err(ContextError::UnknownHandle),
        };
        if self.is_referenced(structure.0) {
            return Err(ContextError::ResourceInFlight(label));
        }
        self.bottom_levels.remove(&structure.0);
        self.unordered.remove(&structure.0);
        self.events.push(Event::ReleaseBottomLevel(label));
        Ok(())
    }

    fn release_top_level(&mut self, structure: SoftwareTopLevel) -> Result<()> {
        let label = match self.top_levels.get(&structure.0) {
            Some(entry) => entry.label.clone(),
            None => return Err(ContextError::UnknownHandle),
        };
        if self.is_referenced(structure.0) {
            return Err(ContextError::ResourceInFlight(label));
        }
        self.top_levels.remove(&structure.0);
        self.events.push(Event::ReleaseTopLevel(label));
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.recording);
        self.unordered.clear();
        if !batch.is_empty() {
            self.in_flight.push(batch);
        }
        self.events.push(Event::Submit);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        let batches = std::mem::take(&mut self.in_flight);
        for command in batches.into_iter().flatten() {
            self.execute(command)?;
        }
        self.events.push(Event::WaitIdle);
        Ok(())
    }
}

/// One placed instance of a bottom-level structure.
pub struct SoftwareInstance {
    pub record: InstanceRecord,
    object_to_world: Matrix4<f32>,
    /// `None` for a singular transform, which collapses the instance.
    world_to_object: Option<Matrix4<f32>>,
    mesh: Arc<TriangleBvh>,
}

impl SoftwareInstance {
    fn new(record: InstanceRecord, mesh: Arc<TriangleBvh>) -> Self {
        let object_to_world = record.world();
        Self {
            record,
            object_to_world,
            world_to_object: object_to_world.invert(),
            mesh,
        }
    }

    pub fn mesh(&self) -> &TriangleBvh {
        &self.mesh
    }

    fn world_bounds(&self) -> Aabb {
        match self.world_to_object {
            Some(_) => self.mesh.bounds().transformed(&self.object_to_world),
            None => Aabb::EMPTY,
        }
    }
}

/// Top level built by the software context.
pub struct InstanceBvh {
    instances: Vec<SoftwareInstance>,
    bvh: Bvh,
}

impl InstanceBvh {
    fn new(instances: Vec<SoftwareInstance>) -> Self {
        let bounds: Vec<Aabb> = instances.iter().map(SoftwareInstance::world_bounds).collect();
        let bvh = Bvh::build(&bounds);
        Self { instances, bvh }
    }

    pub fn instances(&self) -> &[SoftwareInstance] {
        &self.instances
    }

    /// World-space bounds of every instance.
    pub fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }
}

impl Tracer for InstanceBvh {
    fn trace(&self, ray: &Ray) -> Option<Hit> {
        let (_, hit) = self.bvh.closest(
            ray.origin.into(),
            ray.direction.into(),
            ray.t_min,
            ray.t_max,
            |index, t_max| {
                let instance = &self.instances[index];
                if instance.record.mask() & ray.instance_mask == 0 {
                    return None;
                }
                let world_to_object = instance.world_to_object?;
                // unnormalized object-space direction keeps t in world units
                let origin = world_to_object.transform_point(ray.origin);
                let direction = world_to_object.transform_vector(ray.direction);
                let (t, triangle) = instance.mesh.intersect(origin, direction, ray.t_min, t_max)?;

                let mut normal = world_to_object.transpose().transform_vector(triangle.normal);
                if normal.magnitude2() > 0.0 {
                    normal = normal.normalize();
                }
                if normal.dot(ray.direction) > 0.0 {
                    normal = -normal;
                }
                Some((
                    t,
                    Hit {
                        t,
                        instance_id: instance.record.instance_id(),
                        hit_group_index: instance.record.hit_group_contribution(),
                        primitive_index: triangle.primitive,
                        barycentrics: triangle.barycentrics,
                        normal,
                    },
                ))
            },
        )?;
        Some(hit)
    }
}
