mod common;

use std::path::Path;

use cgmath::{Matrix4, SquareMatrix, Vector3};
use rt_ngin::{
    GraphicsContext, SoftwareContext, Validation,
    acceleration::{self, InstanceRecord},
    context::{BufferUsage, BufferView, ContextError, InstanceFlags},
    geometry::{self, PackedGeometry},
    resources,
    software::{Event, SoftwareBuffer},
};

use crate::common::{Fixture, MeshFile, Node};

struct Uploaded {
    packed: PackedGeometry,
    meshes: resources::mesh::MeshStore,
    graph: resources::scene::SceneGraph,
    vertex_buffer: SoftwareBuffer,
    index_buffer: SoftwareBuffer,
}

fn upload(ctx: &mut SoftwareContext, fixture: &Fixture) -> Uploaded {
    upload_with(ctx, fixture, Validation::Strict)
}

fn upload_with(ctx: &mut SoftwareContext, fixture: &Fixture, validation: Validation) -> Uploaded {
    let (graph, mut meshes) =
        resources::load_scene_graph(fixture.data_dir(), Path::new("scene.bin"), validation).unwrap();
    let packed = geometry::pack(meshes.meshes_mut());
    let vertex_buffer = ctx
        .create_buffer("vertex buffer", packed.vertex_bytes(), BufferUsage::Geometry)
        .unwrap();
    let index_buffer = ctx
        .create_buffer("index buffer", &packed.index_bytes(), BufferUsage::Geometry)
        .unwrap();
    ctx.clear_events();
    Uploaded {
        packed,
        meshes,
        graph,
        vertex_buffer,
        index_buffer,
    }
}

fn two_quads_and_a_triangle() -> Fixture {
    let fixture = Fixture::new();
    fixture
        .mesh("quad.mesh", &MeshFile::quad("Quad"))
        .mesh("tri.mesh", &MeshFile::triangle("Tri"))
        .scene(
            "scene.bin",
            &Node::new("Root")
                .child(Node::new("Q1").at([-2.0, 0.0, 0.0]).with_mesh("quad.mesh"))
                .child(Node::new("Empty"))
                .child(Node::new("T").at([0.0, 2.0, 0.0]).with_mesh("tri.mesh"))
                .child(Node::new("Q2").at([2.0, 0.0, 0.0]).with_mesh("quad.mesh")),
        );
    fixture
}

#[test]
fn builds_are_ordered_and_transients_released_after_completion() {
    let fixture = two_quads_and_a_triangle();
    let mut ctx = SoftwareContext::new();
    let up = upload(&mut ctx, &fixture);

    let structures = acceleration::build(
        &mut ctx,
        up.meshes.meshes(),
        &up.graph.root,
        &up.graph.render_objects,
        &up.vertex_buffer,
        &up.index_buffer,
    )
    .unwrap();

    assert_eq!(
        ctx.events(),
        &[
            Event::CreateBuffer("bottom level scratch".into()),
            Event::BuildBottomLevel("bottom level #0 `Quad`".into()),
            Event::BuildBottomLevel("bottom level #1 `Tri`".into()),
            Event::Barrier,
            Event::CreateBuffer("top level instances".into()),
            Event::CreateBuffer("top level scratch".into()),
            Event::BuildTopLevel("top level".into()),
            Event::Submit,
            Event::WaitIdle,
            Event::ReleaseBuffer("bottom level scratch".into()),
            Event::ReleaseBuffer("top level scratch".into()),
            Event::ReleaseBuffer("top level instances".into()),
        ]
    );
    assert_eq!(structures.bottom_levels.len(), 2);
    // vertex and index buffers only
    assert_eq!(ctx.live_buffers(), 2);
    assert_eq!(ctx.live_structures(), 3);

    let blas = ctx.bottom_level(&structures.bottom_levels[0]).unwrap();
    assert_eq!(blas.triangles.len(), 2);
    let tlas = ctx.top_level(&structures.top_level).unwrap();
    assert_eq!(tlas.instances().len(), 3);
}

#[test]
fn instances_map_render_objects_to_meshes() {
    let fixture = two_quads_and_a_triangle();
    let mut ctx = SoftwareContext::new();
    let up = upload(&mut ctx, &fixture);

    let structures = acceleration::build(
        &mut ctx,
        up.meshes.meshes(),
        &up.graph.root,
        &up.graph.render_objects,
        &up.vertex_buffer,
        &up.index_buffer,
    )
    .unwrap();

    let summary: Vec<_> = structures
        .instances
        .iter()
        .map(|r| (r.instance_id(), r.hit_group_contribution(), r.acceleration_structure, r.mask()))
        .collect();
    assert_eq!(summary, vec![(0, 0, 0, 1), (1, 1, 1, 1), (2, 0, 0, 1)]);

    let flags = structures.instances[0].flags();
    assert!(flags.has(InstanceFlags::TRIANGLE_FRONT_COUNTERCLOCKWISE));
    assert!(!flags.has(InstanceFlags::TRIANGLE_CULL_DISABLE));

    let objects = up.graph.root.flatten();
    for (record, id) in structures.instances.iter().zip(&up.graph.render_objects) {
        assert_eq!(record.world(), objects[id.0].transform);
    }
    assert_eq!(
        structures.instances[2].world(),
        Matrix4::from_translation(Vector3::new(2.0, 0.0, 0.0))
    );
}

#[test]
fn shared_mesh_collapses_to_one_bottom_level() {
    let fixture = Fixture::new();
    fixture.mesh("cube.mesh", &MeshFile::quad("Cube")).scene(
        "scene.bin",
        &Node::new("Root")
            .child(Node::new("A").scaled([2.0; 3]).with_mesh("cube.mesh"))
            .child(Node::new("B").scaled([2.0; 3]).with_mesh("cube.mesh")),
    );
    let mut ctx = SoftwareContext::new();
    let up = upload(&mut ctx, &fixture);

    let structures = acceleration::build(
        &mut ctx,
        up.meshes.meshes(),
        &up.graph.root,
        &up.graph.render_objects,
        &up.vertex_buffer,
        &up.index_buffer,
    )
    .unwrap();

    let builds = ctx
        .events()
        .iter()
        .filter(|e| matches!(e, Event::BuildBottomLevel(_)))
        .count();
    assert_eq!(builds, 1);
    assert_eq!(structures.instances.len(), 2);
    for record in &structures.instances {
        assert_eq!(record.world(), Matrix4::from_scale(2.0));
        assert_eq!(record.acceleration_structure, 0);
    }
    assert_eq!(up.packed.vertices.len(), 4);
}

#[test]
fn top_level_without_barrier_is_rejected() {
    let fixture = two_quads_and_a_triangle();
    let mut ctx = SoftwareContext::new();
    let up = upload(&mut ctx, &fixture);

    let mesh = up.meshes.get(0).unwrap();
    let desc = geometry::geometry_desc(mesh);
    let scratch = ctx.create_scratch_buffer("scratch", 1024).unwrap();
    let blas = ctx
        .build_bottom_level("quad", &desc, &up.vertex_buffer, &up.index_buffer, &scratch)
        .unwrap();

    let record = InstanceRecord::new(
        &Matrix4::identity(),
        0,
        1,
        0,
        InstanceFlags::NONE,
        0,
    );
    let instances = ctx
        .create_buffer("instances", bytemuck::bytes_of(&record), BufferUsage::Instances)
        .unwrap();
    let bottom_levels = vec![blas];
    assert_eq!(
        ctx.build_top_level("tlas", &[record], &instances, &bottom_levels, &scratch)
            .unwrap_err(),
        ContextError::MissingBarrier
    );

    ctx.acceleration_structure_barrier();
    ctx.build_top_level("tlas", &[record], &instances, &bottom_levels, &scratch)
        .unwrap();
}

#[test]
fn resources_used_by_pending_work_cannot_be_released() {
    let fixture = two_quads_and_a_triangle();
    let mut ctx = SoftwareContext::new();
    let up = upload(&mut ctx, &fixture);

    let (bottom_levels, scratch) = acceleration::build_bottom_level(
        &mut ctx,
        up.meshes.meshes(),
        &up.vertex_buffer,
        &up.index_buffer,
    )
    .unwrap();
    ctx.submit().unwrap();

    // submitted but not waited on
    assert_eq!(
        ctx.release_buffer(scratch).unwrap_err(),
        ContextError::ResourceInFlight("bottom level scratch".into())
    );
    assert!(matches!(
        ctx.release_bottom_level(bottom_levels.into_iter().next().unwrap()),
        Err(ContextError::ResourceInFlight(_))
    ));

    ctx.wait_idle().unwrap();
    let descriptor = ctx
        .allocate_descriptor(&up.index_buffer, BufferView::Raw { elements: 1 })
        .unwrap();
    assert_eq!(
        ctx.release_buffer(up.index_buffer).unwrap_err(),
        ContextError::ResourceInFlight("index buffer".into())
    );
    ctx.release_descriptor(descriptor).unwrap();
}

#[test]
fn descriptor_heap_overflow_is_reported() {
    let mut ctx = SoftwareContext::with_descriptor_capacity(1);
    let buffer = ctx
        .create_buffer("words", &[0u8; 8], BufferUsage::Geometry)
        .unwrap();
    ctx.allocate_descriptor(&buffer, BufferView::Raw { elements: 2 })
        .unwrap();
    assert_eq!(
        ctx.allocate_descriptor(&buffer, BufferView::Raw { elements: 2 })
            .unwrap_err(),
        ContextError::DescriptorHeapFull { capacity: 1 }
    );
}

#[test]
fn failed_bottom_level_build_releases_partial_work() {
    let fixture = Fixture::new();
    fixture
        .mesh("quad.mesh", &MeshFile::quad("Quad"))
        .mesh(
            "bad.mesh",
            &MeshFile::new(
                "Bad",
                vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                vec![0, 1, 9],
            ),
        )
        .scene(
            "scene.bin",
            &Node::new("Root")
                .child(Node::new("Q").with_mesh("quad.mesh"))
                .child(Node::new("B").with_mesh("bad.mesh")),
        );
    let mut ctx = SoftwareContext::new();
    let up = upload_with(&mut ctx, &fixture, Validation::Trusted);

    let err = acceleration::build(
        &mut ctx,
        up.meshes.meshes(),
        &up.graph.root,
        &up.graph.render_objects,
        &up.vertex_buffer,
        &up.index_buffer,
    )
    .err()
    .unwrap();
    assert!(matches!(err, ContextError::InvalidGeometry { ref label, .. } if label.contains("Bad")));

    // the quad's build completed before it was released
    assert_eq!(
        ctx.events(),
        &[
            Event::CreateBuffer("bottom level scratch".into()),
            Event::BuildBottomLevel("bottom level #0 `Quad`".into()),
            Event::Submit,
            Event::WaitIdle,
            Event::ReleaseBottomLevel("bottom level #0 `Quad`".into()),
            Event::ReleaseBuffer("bottom level scratch".into()),
        ]
    );
    assert_eq!(ctx.live_structures(), 0);
    assert_eq!(ctx.live_buffers(), 2);

    ctx.release_buffer(up.index_buffer).unwrap();
    ctx.release_buffer(up.vertex_buffer).unwrap();
    assert_eq!(ctx.live_buffers(), 0);
}
