//! Device interface the scene pipeline records its GPU work through.
//!
//! [`GraphicsContext`] is the seam between the scene (loading, packing,
//! acceleration-structure building) and whatever executes the work: the CPU
//! [`SoftwareContext`](crate::software::SoftwareContext) or, with the
//! `hardware` feature, the wgpu-backed context. Work is recorded, submitted
//! and then waited on; nothing referenced by a submitted batch may be released
//! before [`GraphicsContext::wait_idle`] returns.

use std::ops::BitOr;

use thiserror::Error;

use crate::acceleration::InstanceRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("the device does not support raytracing")]
    RaytracingUnsupported,
    #[error("failed to create {what}: {reason}")]
    ResourceCreation { what: String, reason: String },
    #[error("descriptor heap is full ({capacity} slots)")]
    DescriptorHeapFull { capacity: u32 },
    #[error("`{0}` is still referenced by work that has not completed")]
    ResourceInFlight(String),
    #[error("top-level build references bottom-level structures without a barrier")]
    MissingBarrier,
    #[error("invalid geometry for `{label}`: {reason}")]
    InvalidGeometry { label: String, reason: String },
    #[error("unknown or already released handle")]
    UnknownHandle,
    #[error("device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, ContextError>;

/// What a buffer is created for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex or index data read by acceleration-structure builds and shaders.
    Geometry,
    /// Top-level instance records.
    Instances,
    /// Build scratch memory.
    Scratch,
}

/// Shader view of a buffer placed in a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferView {
    /// Array of `elements` structs, `stride` bytes each.
    Structured { stride: u32, elements: u32 },
    /// Untyped view of `elements` 32-bit words.
    Raw { elements: u32 },
}

/// Slot in the shader-visible descriptor heap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorIndex(pub u32);

/// Fixed-size pool of descriptor slots. Released slots are reused first.
#[derive(Clone, Debug)]
pub struct DescriptorHeap {
    capacity: u32,
    next: u32,
    free: Vec<u32>,
}

impl DescriptorHeap {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next: 0,
            free: Vec::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<DescriptorIndex> {
        if let Some(slot) = self.free.pop() {
            return Ok(DescriptorIndex(slot));
        }
        if self.next >= self.capacity {
            return Err(ContextError::DescriptorHeapFull {
                capacity: self.capacity,
            });
        }
        self.next += 1;
        Ok(DescriptorIndex(self.next - 1))
    }

    pub fn release(&mut self, index: DescriptorIndex) -> Result<()> {
        if index.0 >= self.next || self.free.contains(&index.0) {
            return Err(ContextError::UnknownHandle);
        }
        self.free.push(index.0);
        Ok(())
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Slots currently handed out.
    pub fn in_use(&self) -> u32 {
        self.next - self.free.len() as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32x3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            Self::Uint16 => 2,
        }
    }
}

/// Geometry flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GeometryFlags(pub u32);

impl GeometryFlags {
    pub const NONE: Self = Self(0);
    /// Any-hit shaders are skipped for this geometry.
    pub const OPAQUE: Self = Self(1 << 0);

    pub const fn has(&self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }
}

impl BitOr for GeometryFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Instance flags, bit-compatible with the D3D12 instance descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InstanceFlags(pub u8);

impl InstanceFlags {
    pub const NONE: Self = Self(0);
    pub const TRIANGLE_CULL_DISABLE: Self = Self(1 << 0);
    /// Counter-clockwise triangles are front facing.
    pub const TRIANGLE_FRONT_COUNTERCLOCKWISE: Self = Self(1 << 1);
    pub const FORCE_OPAQUE: Self = Self(1 << 2);
    pub const FORCE_NON_OPAQUE: Self = Self(1 << 3);

    pub const fn has(&self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }
}

impl BitOr for InstanceFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One triangle-list geometry inside the shared vertex and index buffers.
///
/// Offsets are in bytes. Indices are local to the geometry, so the first
/// vertex at `vertex_buffer_offset` is index zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryDesc {
    pub vertex_buffer_offset: u64,
    pub vertex_count: u32,
    pub vertex_stride: u64,
    pub vertex_format: VertexFormat,
    pub index_buffer_offset: u64,
    pub index_count: u32,
    pub index_format: IndexFormat,
    pub flags: GeometryFlags,
}

impl GeometryDesc {
    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }
}

/// Memory requirements reported before a build.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrebuildInfo {
    pub result_size: u64,
    pub scratch_size: u64,
}

/// A device able to build and trace two-level acceleration structures.
///
/// Builds are recorded and only run after [`submit`](Self::submit); callers
/// block on [`wait_idle`](Self::wait_idle) before releasing anything the
/// batch used.
pub trait GraphicsContext {
    type Buffer;
    type BottomLevel;
    type TopLevel;

    fn create_buffer(&mut self, label: &str, contents: &[u8], usage: BufferUsage) -> Result<Self::Buffer>;

    fn create_scratch_buffer(&mut self, label: &str, size: u64) -> Result<Self::Buffer>;

    fn release_buffer(&mut self, buffer: Self::Buffer) -> Result<()>;

    /// Places a shader resource view of `buffer` into a free descriptor slot.
    fn allocate_descriptor(&mut self, buffer: &Self::Buffer, view: BufferView) -> Result<DescriptorIndex>;

    fn release_descriptor(&mut self, index: DescriptorIndex) -> Result<()>;

    fn bottom_level_prebuild_info(&self, geometry: &GeometryDesc) -> PrebuildInfo;

    fn top_level_prebuild_info(&self, instance_count: u32) -> PrebuildInfo;

    /// Records a single-geometry bottom-level build.
    fn build_bottom_level(
        &mut self,
        label: &str,
        geometry: &GeometryDesc,
        vertex_buffer: &Self::Buffer,
        index_buffer: &Self::Buffer,
        scratch: &Self::Buffer,
    ) -> Result<Self::BottomLevel>;

    /// Orders every recorded bottom-level build before the commands that follow.
    fn acceleration_structure_barrier(&mut self);

    /// Records the top-level build over `instances`, whose
    /// `acceleration_structure` fields index into `bottom_levels`.
    /// `instance_buffer` holds the same records as uploaded bytes.
    fn build_top_level(
        &mut self,
        label: &str,
        instances: &[InstanceRecord],
        instance_buffer: &Self::Buffer,
        bottom_levels: &[Self::BottomLevel],
        scratch: &Self::Buffer,
    ) -> Result<Self::TopLevel>;

    fn release_bottom_level(&mut self, structure: Self::BottomLevel) -> Result<()>;

    fn release_top_level(&mut self, structure: Self::TopLevel) -> Result<()>;

    /// Closes the recorded commands and hands them to the device.
    fn submit(&mut self) -> Result<()>;

    /// Blocks until every submitted batch has completed.
    fn wait_idle(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_slots_are_reused() {
        let mut heap = DescriptorHeap::new(2);
        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        assert_eq!((a, b), (DescriptorIndex(0), DescriptorIndex(1)));
        assert_eq!(
            heap.allocate(),
            Err(ContextError::DescriptorHeapFull { capacity: 2 })
        );
        heap.release(a).unwrap();
        assert_eq!(heap.release(a), Err(ContextError::UnknownHandle));
        assert_eq!(heap.in_use(), 1);
        assert_eq!(heap.allocate().unwrap(), a);
    }
}
