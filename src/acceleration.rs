//! Two-level acceleration structures over the packed scene geometry.
//!
//! Every mesh gets one single-geometry bottom-level structure that points into
//! the shared vertex and index buffers. The top-level structure holds one
//! instance per render object, carrying the object's world transform and
//! selecting the hit group of its mesh.

use bytemuck::{Pod, Zeroable};
use cgmath::Matrix4;

use crate::{
    context::{BufferUsage, GraphicsContext, InstanceFlags, Result},
    data_structures::{
        mesh::Mesh,
        scene_graph::{Object, ObjectId},
    },
    geometry::geometry_desc,
};

/// Top-level instance in the 64-byte D3D12 instance-descriptor layout.
///
/// `acceleration_structure` is the position of the referenced bottom-level
/// structure in the slice passed to
/// [`GraphicsContext::build_top_level`]; backends resolve it to an address.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// 3x4 object-to-world transform, translation in column 3.
    pub transform: [[f32; 4]; 3],
    /// `instance_id` in the low 24 bits, `mask` in the high 8.
    pub instance_id_and_mask: u32,
    /// Hit-group contribution in the low 24 bits, flags in the high 8.
    pub contribution_and_flags: u32,
    pub acceleration_structure: u64,
}

impl InstanceRecord {
    pub const SIZE: usize = std::mem::size_of::<InstanceRecord>();

    pub fn new(
        world: &Matrix4<f32>,
        instance_id: u32,
        mask: u8,
        hit_group_contribution: u32,
        flags: InstanceFlags,
        acceleration_structure: u64,
    ) -> Self {
        Self {
            transform: instance_transform(world),
            instance_id_and_mask: (instance_id & 0x00FF_FFFF) | (u32::from(mask) << 24),
            contribution_and_flags: (hit_group_contribution & 0x00FF_FFFF)
                | (u32::from(flags.0) << 24),
            acceleration_structure,
        }
    }

    pub fn instance_id(&self) -> u32 {
        self.instance_id_and_mask & 0x00FF_FFFF
    }

    pub fn mask(&self) -> u8 {
        (self.instance_id_and_mask >> 24) as u8
    }

    pub fn hit_group_contribution(&self) -> u32 {
        self.contribution_and_flags & 0x00FF_FFFF
    }

    pub fn flags(&self) -> InstanceFlags {
        InstanceFlags((self.contribution_and_flags >> 24) as u8)
    }

    /// The full object-to-world matrix (column-vector form).
    #[rustfmt::skip]
    pub fn world(&self) -> Matrix4<f32> {
        let t = &self.transform;
        Matrix4::new(
            t[0][0], t[1][0], t[2][0], 0.0,
            t[0][1], t[1][1], t[2][1], 0.0,
            t[0][2], t[1][2], t[2][2], 0.0,
            t[0][3], t[1][3], t[2][3], 1.0,
        )
    }
}

/// First three rows of the transposed row-vector image:
/// `rows[j][k] = image[k][j]`, which puts the translation in column 3.
pub fn instance_transform(world: &Matrix4<f32>) -> [[f32; 4]; 3] {
    let image: [[f32; 4]; 4] = (*world).into();
    std::array::from_fn(|j| std::array::from_fn(|k| image[k][j]))
}

/// One record per render object. `objects` is the flattened tree indexed by
/// [`ObjectId`].
pub fn instance_records(render_objects: &[ObjectId], objects: &[&Object]) -> Vec<InstanceRecord> {
    render_objects
        .iter()
        .enumerate()
        .filter_map(|(position, id)| {
            let object = objects.get(id.0)?;
            let mesh = object.mesh_index()?;
            Some(InstanceRecord::new(
                &object.transform,
                position as u32,
                1,
                mesh as u32,
                InstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE,
                mesh as u64,
            ))
        })
        .collect()
}

/// Built structures owned by the scene.
pub struct AccelerationStructures<C: GraphicsContext> {
    /// Indexed by mesh index.
    pub bottom_levels: Vec<C::BottomLevel>,
    pub top_level: C::TopLevel,
    pub instances: Vec<InstanceRecord>,
}

/// Records one bottom-level build per mesh followed by a barrier.
///
/// All builds share one scratch buffer sized for the largest request. The
/// scratch buffer is returned to the caller, who must keep it alive until
/// the batch has completed.
pub fn build_bottom_level<C: GraphicsContext>(
    ctx: &mut C,
    meshes: &[Mesh],
    vertex_buffer: &C::Buffer,
    index_buffer: &C::Buffer,
) -> Result<(Vec<C::BottomLevel>, C::Buffer)> {
    let geometries: Vec<_> = meshes.iter().map(geometry_desc).collect();
    let scratch_size = geometries
        .iter()
        .map(|geometry| ctx.bottom_level_prebuild_info(geometry).scratch_size)
        .max()
        .unwrap_or(0);
    let scratch = ctx.create_scratch_buffer("bottom level scratch", scratch_size)?;

    let mut structures = Vec::with_capacity(meshes.len());
    for (mesh, geometry) in meshes.iter().zip(&geometries) {
        let label = format!("bottom level #{} `{}`", mesh.index, mesh.name);
        match ctx.build_bottom_level(&label, geometry, vertex_buffer, index_buffer, &scratch) {
            Ok(structure) => structures.push(structure),
            Err(e) => {
                abandon(ctx, None, structures, vec![scratch]);
                return Err(e);
            }
        }
    }
    ctx.acceleration_structure_barrier();

    log::debug!(
        "recorded {} bottom-level builds, scratch {scratch_size} bytes",
        structures.len()
    );
    Ok((structures, scratch))
}

/// Uploads the instance records and records the top-level build.
///
/// Returns the structure together with the instance and scratch buffers,
/// which stay referenced by the batch until it has completed.
pub fn build_top_level<C: GraphicsContext>(
    ctx: &mut C,
    instances: &[InstanceRecord],
    bottom_levels: &[C::BottomLevel],
) -> Result<(C::TopLevel, C::Buffer, C::Buffer)> {
    let instance_buffer = ctx.create_buffer(
        "top level instances",
        bytemuck::cast_slice(instances),
        BufferUsage::Instances,
    )?;
    let info = ctx.top_level_prebuild_info(instances.len() as u32);
    let scratch = match ctx.create_scratch_buffer("top level scratch", info.scratch_size) {
        Ok(scratch) => scratch,
        Err(e) => {
            abandon(ctx, None, Vec::new(), vec![instance_buffer]);
            return Err(e);
        }
    };
    let top_level = match ctx.build_top_level(
        "top level",
        instances,
        &instance_buffer,
        bottom_levels,
        &scratch,
    ) {
        Ok(top_level) => top_level,
        Err(e) => {
            abandon(ctx, None, Vec::new(), vec![scratch, instance_buffer]);
            return Err(e);
        }
    };
    log::debug!("recorded top-level build over {} instances", instances.len());
    Ok((top_level, instance_buffer, scratch))
}

/// Builds both levels, submits, waits, then frees the transient buffers.
pub fn build<C: GraphicsContext>(
    ctx: &mut C,
    meshes: &[Mesh],
    root: &Object,
    render_objects: &[ObjectId],
    vertex_buffer: &C::Buffer,
    index_buffer: &C::Buffer,
) -> Result<AccelerationStructures<C>> {
    let (bottom_levels, bottom_scratch) =
        build_bottom_level(ctx, meshes, vertex_buffer, index_buffer)?;

    let instances = instance_records(render_objects, &root.flatten());
    let (top_level, instance_buffer, top_scratch) =
        match build_top_level(ctx, &instances, &bottom_levels) {
            Ok(built) => built,
            Err(e) => {
                abandon(ctx, None, bottom_levels, vec![bottom_scratch]);
                return Err(e);
            }
        };

    let transients = vec![bottom_scratch, top_scratch, instance_buffer];
    if let Err(e) = ctx.submit().and_then(|()| ctx.wait_idle()) {
        abandon(ctx, Some(top_level), bottom_levels, transients);
        return Err(e);
    }
    let mut released = Ok(());
    for buffer in transients {
        released = released.and(ctx.release_buffer(buffer));
    }
    if let Err(e) = released {
        abandon(ctx, Some(top_level), bottom_levels, Vec::new());
        return Err(e);
    }

    log::info!(
        "acceleration structures built: {} bottom levels, {} instances",
        bottom_levels.len(),
        instances.len()
    );
    Ok(AccelerationStructures {
        bottom_levels,
        top_level,
        instances,
    })
}

/// Releases what a failed build leaves behind. Recorded work is submitted and
/// waited on first so none of it still references the released resources.
fn abandon<C: GraphicsContext>(
    ctx: &mut C,
    top_level: Option<C::TopLevel>,
    bottom_levels: Vec<C::BottomLevel>,
    buffers: Vec<C::Buffer>,
) {
    if let Err(e) = ctx.submit().and_then(|()| ctx.wait_idle()) {
        log::warn!("cannot flush recorded builds after a failure: {e}");
    }
    let mut released = top_level.map_or(Ok(()), |structure| ctx.release_top_level(structure));
    for structure in bottom_levels {
        released = released.and(ctx.release_bottom_level(structure));
    }
    for buffer in buffers {
        released = released.and(ctx.release_buffer(buffer));
    }
    if let Err(e) = released {
        log::warn!("cannot release every resource of a failed build: {e}");
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Matrix4, Vector3};

    use super::*;

    #[test]
    fn record_is_64_bytes() {
        assert_eq!(InstanceRecord::SIZE, 64);
    }

    #[test]
    fn packs_id_mask_contribution_and_flags() {
        let record = InstanceRecord::new(
            &Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0)),
            5,
            1,
            7,
            InstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE,
            7,
        );
        assert_eq!(record.instance_id(), 5);
        assert_eq!(record.mask(), 1);
        assert_eq!(record.hit_group_contribution(), 7);
        assert_eq!(record.flags(), InstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE);
        assert_eq!(record.transform[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(record.transform[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(record.transform[2], [0.0, 0.0, 1.0, 3.0]);
        assert_eq!(
            record.world(),
            Matrix4::from_translation(Vector3::new(1.0, 2.0, 3.0))
        );
    }
}
