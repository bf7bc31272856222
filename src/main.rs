use anyhow::Context;

use rt_ngin::{RenderConfig, Scene, SoftwareContext, config, render};

fn main() {
    let cli = match config::parse_args(std::env::args().skip(1)) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            config::print_help();
            return;
        }
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = env_logger::Builder::new()
        .filter_level(cli.log_level)
        .parse_default_env()
        .try_init()
    {
        eprintln!("Warning: Could not initialize logger: {}", e);
    }

    if let Err(e) = run(cli.config) {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(config: RenderConfig) -> anyhow::Result<()> {
    if config.window {
        return run_window(config);
    }

    let mut ctx = SoftwareContext::new();
    let mut scene = Scene::new();
    let result = scene
        .load(&mut ctx, &config.data_dir, &config.scene, config.validation)
        .with_context(|| format!("cannot load {}", config.scene_path().display()))
        .and_then(|()| {
            let image = render::render_scene(&ctx, &scene, &config)?;
            render::save_png(&image, &config.output)
        });

    // release device resources even when loading or rendering failed
    let destroyed = scene.destroy(&mut ctx).context("scene teardown failed");
    result?;
    destroyed?;
    Ok(())
}

#[cfg(feature = "hardware")]
fn run_window(config: RenderConfig) -> anyhow::Result<()> {
    rt_ngin::hardware::run(config)
}

#[cfg(not(feature = "hardware"))]
fn run_window(_config: RenderConfig) -> anyhow::Result<()> {
    anyhow::bail!("--window needs a build with the `hardware` feature")
}
