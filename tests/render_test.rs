mod common;

use std::path::Path;

use cgmath::{InnerSpace, Point3, Vector3};
use rt_ngin::{
    RenderConfig, Scene, SoftwareContext, Validation,
    camera::{Camera, Projection, SceneConstants},
    config::CameraConfig,
    render,
    trace::{Hit, Ray, Tracer},
};

use crate::common::{Fixture, MeshFile, Node, assert_close};

fn stacked_scene() -> Fixture {
    let fixture = Fixture::new();
    fixture
        .mesh("quad.mesh", &MeshFile::quad("Quad"))
        .mesh("tri.mesh", &MeshFile::triangle("Tri"))
        .scene(
            "scene.bin",
            &Node::new("Root")
                .child(Node::new("Front").with_mesh("quad.mesh"))
                .child(Node::new("Back").at([0.0, 0.0, -1.0]).with_mesh("tri.mesh"))
                .child(Node::new("Side").at([4.0, 0.0, 0.0]).scaled([2.0; 3]).with_mesh("quad.mesh")),
        );
    fixture
}

fn config(fixture: &Fixture) -> RenderConfig {
    RenderConfig {
        data_dir: fixture.data_dir().to_path_buf(),
        width: 32,
        height: 32,
        camera: Some(CameraConfig {
            position: [0.0, 0.0, 5.0],
            yaw: -90.0,
            pitch: 0.0,
            fovy: 45.0,
        }),
        light_position: [0.0, 0.0, 10.0],
        ..Default::default()
    }
}

fn loaded(fixture: &Fixture) -> (SoftwareContext, Scene<SoftwareContext>) {
    let mut ctx = SoftwareContext::new();
    let mut scene = Scene::new();
    scene
        .load(&mut ctx, fixture.data_dir(), Path::new("scene.bin"), Validation::Strict)
        .unwrap();
    (ctx, scene)
}

#[test]
fn nearest_hit_wins() {
    let fixture = stacked_scene();
    let (mut ctx, mut scene) = loaded(&fixture);
    let tracer = ctx.top_level(scene.top_level().unwrap()).unwrap();

    let ray = Ray::new(Point3::new(0.25, 0.25, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let hit = tracer.trace(&ray).unwrap();
    assert_close(hit.t, 5.0);
    assert_eq!((hit.instance_id, hit.hit_group_index), (0, 0));
    assert_close(hit.normal.dot(Vector3::unit_z()), 1.0);

    // from behind, the triangle is in front and the normal faces the ray
    let ray = Ray::new(Point3::new(0.25, 0.25, -5.0), Vector3::new(0.0, 0.0, 1.0));
    let hit = tracer.trace(&ray).unwrap();
    assert_close(hit.t, 4.0);
    assert_eq!((hit.instance_id, hit.hit_group_index), (1, 1));
    assert_close(hit.normal.dot(Vector3::unit_z()), -1.0);

    scene.destroy(&mut ctx).unwrap();
}

#[test]
fn instance_transform_places_the_mesh() {
    let fixture = stacked_scene();
    let (mut ctx, mut scene) = loaded(&fixture);
    let tracer = ctx.top_level(scene.top_level().unwrap()).unwrap();

    // the side quad spans x in [3, 5] after its scale of two
    let ray = Ray::new(Point3::new(4.9, 0.9, 5.0), Vector3::new(0.0, 0.0, -1.0));
    let hit = tracer.trace(&ray).unwrap();
    assert_eq!(hit.instance_id, 2);
    assert_close(hit.t, 5.0);

    let ray = Ray::new(Point3::new(5.1, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0));
    assert!(tracer.trace(&ray).is_none());

    scene.destroy(&mut ctx).unwrap();
}

#[test]
fn misses_and_masked_instances_return_none() {
    let fixture = stacked_scene();
    let (mut ctx, mut scene) = loaded(&fixture);
    let tracer = ctx.top_level(scene.top_level().unwrap()).unwrap();

    let away = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, 1.0));
    assert!(tracer.trace(&away).is_none());

    let masked = Ray::new(Point3::new(0.0, 0.0, 5.0), Vector3::new(0.0, 0.0, -1.0)).with_mask(0x2);
    assert!(tracer.trace(&masked).is_none());

    scene.destroy(&mut ctx).unwrap();
}

#[test]
fn frame_shows_the_lit_quad_over_the_background() {
    let fixture = stacked_scene();
    let (mut ctx, mut scene) = loaded(&fixture);
    let config = config(&fixture);

    let image = render::render_scene(&ctx, &scene, &config).unwrap();
    assert_eq!(image.dimensions(), (32, 32));

    let center = image.get_pixel(16, 16).0;
    let lit = (0.85f32 * 255.0).round() as i32;
    for channel in &center[..3] {
        assert!((*channel as i32 - lit).abs() <= 2, "center pixel {center:?}");
    }
    assert_eq!(image.get_pixel(0, 0).0, [0, 51, 102, 255]);

    let output = fixture.data_dir().join("frame.png");
    render::save_png(&image, &output).unwrap();
    let reread = image::open(&output).unwrap().to_rgba8();
    assert_eq!(reread, image);

    scene.destroy(&mut ctx).unwrap();
}

#[test]
fn empty_scene_renders_the_background() {
    let fixture = Fixture::new();
    fixture.scene("scene.bin", &Node::new("Root"));
    let (mut ctx, mut scene) = loaded(&fixture);

    let mut config = config(&fixture);
    config.background = [1.0, 0.0, 0.0];
    let image = render::render_scene(&ctx, &scene, &config).unwrap();
    assert!(image.pixels().all(|p| p.0 == [255, 0, 0, 255]));

    scene.destroy(&mut ctx).unwrap();
}

/// Infinite plane facing +Z at z = 0, every hit in hit group 3.
struct Wall;

impl Tracer for Wall {
    fn trace(&self, ray: &Ray) -> Option<Hit> {
        if ray.direction.z >= 0.0 {
            return None;
        }
        let t = -ray.origin.z / ray.direction.z;
        Some(Hit {
            t,
            instance_id: 0,
            hit_group_index: 3,
            primitive_index: 0,
            barycentrics: [0.0, 0.0],
            normal: Vector3::unit_z(),
        })
    }
}

#[test]
fn any_tracer_can_render_a_frame() {
    let camera = Camera::new((0.0, 0.0, 5.0), cgmath::Deg(-90.0), cgmath::Deg(0.0));
    let projection = Projection::new(8, 8, cgmath::Deg(45.0), 0.1, 100.0);
    let mut constants = SceneConstants::new();
    constants.update_view_proj(&camera, &projection);
    constants.set_light_position([0.0, 0.0, 10.0]);

    let image = render::render_frame(&Wall, &constants, 8, 8, [0.0; 3]).unwrap();
    let expected = render::albedo(3);
    let pixel = image.get_pixel(4, 4).0;
    for (channel, albedo) in pixel.iter().zip(expected) {
        assert!((*channel as f32 - albedo * 255.0).abs() <= 3.0, "pixel {pixel:?}");
    }
}
