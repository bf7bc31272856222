//! Window loop: loads the scene on a ray-query device and redraws it every frame.

use std::{iter, sync::Arc};

use anyhow::Context as _;
use instant::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowId},
};

use crate::{
    config::RenderConfig,
    render,
    scene::Scene,
};

use super::{
    context::WgpuContext,
    pass::{FrameUniform, RayQueryPass},
};

const TITLE: &str = "rt-ngin";
const TITLE_INTERVAL: Duration = Duration::from_secs(1);

/// GPU state that only exists while the window does.
struct AppState {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    ctx: WgpuContext,
    scene: Scene<WgpuContext>,
    pass: RayQueryPass,
    config: RenderConfig,
    is_surface_configured: bool,
}

impl AppState {
    async fn new(window: Arc<Window>, config: &RenderConfig) -> anyhow::Result<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .context("no adapter can present to this window")?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let mut ctx = WgpuContext::new(&adapter).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // the traced frame is written without gamma correction, same as the PNG output
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .context("surface reports no formats")?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };

        let mut scene = Scene::new();
        if let Err(e) = scene.load(&mut ctx, &config.data_dir, &config.scene, config.validation) {
            if let Err(teardown) = scene.destroy(&mut ctx) {
                log::error!("scene teardown failed: {teardown}");
            }
            return Err(e).with_context(|| format!("cannot load {}", config.scene_path().display()));
        }

        let pass = RayQueryPass::new(&ctx, &scene, format, surface_config.width, surface_config.height);
        let mut state = Self {
            window,
            surface,
            surface_config,
            ctx,
            scene,
            pass,
            config: config.clone(),
            is_surface_configured: false,
        };
        state.resize(size.width, size.height);
        Ok(state)
    }

    /// Zero-sized (minimised) windows leave the surface unconfigured, which
    /// skips rendering until the next resize.
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.is_surface_configured = false;
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.ctx.device, &self.surface_config);
        self.pass.resize(&self.ctx, &self.scene, width, height);

        let config = RenderConfig {
            width,
            height,
            ..self.config.clone()
        };
        let constants = render::scene_constants(&self.scene, &config);
        self.pass
            .update(&self.ctx.queue, &FrameUniform::new(constants, config.background));
        self.is_surface_configured = true;
    }

    fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.window.request_redraw();

        if !self.is_surface_configured {
            return Ok(());
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let [r, g, b] = self.config.background;
        self.pass.encode(
            &mut encoder,
            &view,
            wgpu::Color {
                r: r as f64,
                g: g as f64,
                b: b as f64,
                a: 1.0,
            },
        );
        self.ctx.queue.submit(iter::once(encoder.finish()));
        output.present();
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(e) = self.scene.destroy(&mut self.ctx) {
            log::error!("scene teardown failed: {e}");
        }
    }
}

struct App {
    config: RenderConfig,
    state: Option<AppState>,
    error: Option<anyhow::Error>,
    frames: u32,
    last_title: Instant,
}

impl App {
    fn new(config: RenderConfig) -> Self {
        Self {
            config,
            state: None,
            error: None,
            frames: 0,
            last_title: Instant::now(),
        }
    }

    fn name(&self) -> String {
        self.config
            .scene
            .file_stem()
            .map(|stem| format!("{TITLE}: {}", stem.to_string_lossy()))
            .unwrap_or_else(|| TITLE.to_string())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        self.error = Some(error);
        event_loop.exit();
    }

    fn count_frame(&mut self) {
        self.frames += 1;
        let elapsed = self.last_title.elapsed();
        if elapsed < TITLE_INTERVAL {
            return;
        }
        let fps = (self.frames as f64 / elapsed.as_secs_f64()).round() as u32;
        let name = self.name();
        if let Some(state) = &self.state {
            state.window.set_title(&format!(
                "{name} [w: {} h: {}] [fps: {fps}]",
                state.surface_config.width, state.surface_config.height
            ));
        }
        self.frames = 0;
        self.last_title = Instant::now();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let window_attributes = Window::default_attributes()
            .with_title(self.name())
            .with_inner_size(winit::dpi::PhysicalSize::new(self.config.width, self.config.height));
        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => Arc::new(window),
            Err(e) => return self.fail(event_loop, e.into()),
        };

        match futures::executor::block_on(AppState::new(window, &self.config)) {
            Ok(state) => {
                state.window.request_redraw();
                self.state = Some(state);
                self.last_title = Instant::now();
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let state = match &mut self.state {
            Some(state) => state,
            None => return,
        };

        match event {
            WindowEvent::CloseRequested => {
                state.destroy();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => state.resize(size.width, size.height),
            WindowEvent::RedrawRequested => {
                match state.render() {
                    Ok(()) => {}
                    Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                        let size = state.window.inner_size();
                        state.resize(size.width, size.height);
                    }
                    Err(e) => {
                        log::error!("unable to render: {e}");
                        return;
                    }
                }
                if state.is_surface_configured {
                    self.count_frame();
                }
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            if state.scene.state() != crate::SceneState::Destroyed {
                state.destroy();
            }
        }
    }
}

/// Opens a window and traces the configured scene until it is closed.
pub fn run(config: RenderConfig) -> anyhow::Result<()> {
    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
