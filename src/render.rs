//! Frame rendering on top of a [`Tracer`].
//!
//! One primary ray per pixel, Lambert shading against a point light and a
//! flat color per hit group. Rows are traced in parallel.

use std::path::Path;

use anyhow::{Context, anyhow};
use cgmath::{Deg, InnerSpace, Point3};
use image::RgbaImage;
use rayon::prelude::*;

use crate::{
    camera::{Camera, Projection, SceneConstants},
    config::RenderConfig,
    context::GraphicsContext,
    scene::Scene,
    software::SoftwareContext,
    trace::{Hit, Ray, Tracer},
};

const AMBIENT: f32 = 0.15;
const Z_NEAR: f32 = 0.1;
const Z_FAR: f32 = 10_000.0;

/// Albedo per hit group, repeating.
const PALETTE: [[f32; 3]; 8] = [
    [0.85, 0.85, 0.85],
    [0.90, 0.35, 0.30],
    [0.35, 0.75, 0.40],
    [0.30, 0.50, 0.90],
    [0.95, 0.80, 0.30],
    [0.70, 0.40, 0.85],
    [0.30, 0.80, 0.85],
    [0.95, 0.55, 0.25],
];

pub fn albedo(hit_group_index: u32) -> [f32; 3] {
    PALETTE[hit_group_index as usize % PALETTE.len()]
}

/// Color of a primary hit lit by the light in `constants`.
pub fn shade(ray: &Ray, hit: &Hit, constants: &SceneConstants) -> [f32; 3] {
    let position = ray.at(hit.t);
    let light = Point3::new(
        constants.light_position[0],
        constants.light_position[1],
        constants.light_position[2],
    );
    let to_light = light - position;
    let diffuse = if to_light.magnitude2() > 0.0 {
        hit.normal.dot(to_light.normalize()).max(0.0)
    } else {
        0.0
    };
    let intensity = AMBIENT + (1.0 - AMBIENT) * diffuse;
    albedo(hit.hit_group_index).map(|c| c * intensity)
}

fn to_rgba(color: [f32; 3]) -> [u8; 4] {
    let f_to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [f_to_u8(color[0]), f_to_u8(color[1]), f_to_u8(color[2]), 255]
}

/// Traces a `width` x `height` frame.
pub fn render_frame<T: Tracer + ?Sized>(
    tracer: &T,
    constants: &SceneConstants,
    width: u32,
    height: u32,
    background: [f32; 3],
) -> anyhow::Result<RgbaImage> {
    let row_bytes = width as usize * 4;
    let mut pixels = vec![0u8; row_bytes * height as usize];
    pixels
        .par_chunks_mut(row_bytes.max(1))
        .enumerate()
        .for_each(|(y, row)| {
            for (x, pixel) in row.chunks_exact_mut(4).enumerate() {
                let ray = constants.primary_ray(x as u32, y as u32, width, height);
                let color = match tracer.trace(&ray) {
                    Some(hit) => shade(&ray, &hit, constants),
                    None => background,
                };
                pixel.copy_from_slice(&to_rgba(color));
            }
        });
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| anyhow!("frame buffer size mismatch"))
}

/// Camera from the configuration, or one framing the scene bounds.
pub fn scene_constants<C: GraphicsContext>(
    scene: &Scene<C>,
    config: &RenderConfig,
) -> SceneConstants {
    let (camera, fovy) = match &config.camera {
        Some(camera) => (Camera::from_config(camera), Deg(camera.fovy)),
        None => {
            let fovy = Deg(45.0);
            (Camera::framing(&scene.world_bounds(), fovy.into()), fovy)
        }
    };
    let projection = Projection::new(config.width, config.height, fovy, Z_NEAR, Z_FAR);
    let mut constants = SceneConstants::new();
    constants.update_view_proj(&camera, &projection);
    constants.set_light_position(config.light_position);
    constants
}

/// Renders a loaded scene through the software context.
pub fn render_scene(
    ctx: &SoftwareContext,
    scene: &Scene<SoftwareContext>,
    config: &RenderConfig,
) -> anyhow::Result<RgbaImage> {
    let constants = scene_constants(scene, config);
    match scene.top_level() {
        Some(top_level) => {
            let tracer = ctx
                .top_level(top_level)
                .context("top-level structure has not been built")?;
            render_frame(tracer.as_ref(), &constants, config.width, config.height, config.background)
        }
        None => {
            log::warn!("nothing to trace, writing the background only");
            let pixel = image::Rgba(to_rgba(config.background));
            Ok(RgbaImage::from_pixel(config.width, config.height, pixel))
        }
    }
}

pub fn save_png(image: &RgbaImage, path: &Path) -> anyhow::Result<()> {
    image
        .save(path)
        .with_context(|| format!("cannot write {}", path.display()))?;
    log::info!("wrote {}x{} frame to {}", image.width(), image.height(), path.display());
    Ok(())
}
