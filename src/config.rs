//! Run configuration.
//!
//! A [`RenderConfig`] is read from an optional TOML file and then overridden
//! by command-line flags parsed with `structopt`. Every field has a default
//! so an empty file (or no file at all) is a valid configuration.

use std::{
    iter,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow, bail};
use serde::Deserialize;
use structopt::{StructOpt, clap::ErrorKind};

/// How strictly scene and mesh files are checked while loading.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    /// Assets are trusted: reads past the end yield zeros and missing mesh
    /// files produce empty meshes.
    Trusted,
    /// Truncated files, bad counts and missing mesh files are errors.
    #[default]
    Strict,
}

/// Explicit camera placement. Angles are in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct CameraConfig {
    pub position: [f32; 3],
    #[serde(default = "default_yaw")]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default = "default_fovy")]
    pub fovy: f32,
}

fn default_yaw() -> f32 {
    -90.0
}

fn default_fovy() -> f32 {
    45.0
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Directory every scene and mesh path is relative to.
    pub data_dir: PathBuf,
    /// Scene container, relative to `data_dir`.
    pub scene: PathBuf,
    /// PNG written by the software renderer.
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub validation: Validation,
    /// Open a window and trace on the GPU (needs the `hardware` feature).
    pub window: bool,
    /// Camera override; when absent the camera frames the scene bounds.
    pub camera: Option<CameraConfig>,
    pub background: [f32; 3],
    pub light_position: [f32; 3],
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            scene: PathBuf::from("scene.bin"),
            output: PathBuf::from("frame.png"),
            width: 1280,
            height: 720,
            validation: Validation::default(),
            window: false,
            camera: None,
            background: [0.0, 0.2, 0.4],
            light_position: [0.0, 50.0, -50.0],
        }
    }
}

impl RenderConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Full path of the scene container.
    pub fn scene_path(&self) -> PathBuf {
        self.data_dir.join(&self.scene)
    }
}

/// Parsed command line.
#[derive(Clone, Debug, PartialEq)]
pub struct CliArgs {
    pub config: RenderConfig,
    pub log_level: log::LevelFilter,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "rt-ngin", about = "Loads a binary scene and traces one frame")]
struct Flags {
    /// Read a TOML configuration; every other flag overrides it
    #[structopt(long = "config", parse(from_os_str))]
    config: Option<PathBuf>,
    /// Directory scene and mesh paths are relative to
    #[structopt(long = "data-dir", parse(from_os_str))]
    data_dir: Option<PathBuf>,
    /// Scene container inside the data directory
    #[structopt(long = "scene", parse(from_os_str))]
    scene: Option<PathBuf>,
    /// Image written by the software renderer
    #[structopt(long = "output", parse(from_os_str))]
    output: Option<PathBuf>,
    /// Frame size as WxH
    #[structopt(long = "size", parse(try_from_str = parse_size))]
    size: Option<(u32, u32)>,
    /// Reject truncated files and missing meshes (default)
    #[structopt(long = "strict", conflicts_with = "trusted")]
    strict: bool,
    /// Accept truncated files and missing meshes
    #[structopt(long = "trusted")]
    trusted: bool,
    /// Trace on the GPU into a window
    #[structopt(long = "window")]
    window: bool,
    /// Debug logging
    #[structopt(short = "v", long = "verbose", conflicts_with = "quiet")]
    verbose: bool,
    /// Warnings and errors only
    #[structopt(short = "q", long = "quiet")]
    quiet: bool,
}

/// Parses command-line arguments (without the program name).
///
/// Returns `Ok(None)` when help or the version was requested.
pub fn parse_args<I>(args: I) -> anyhow::Result<Option<CliArgs>>
where
    I: IntoIterator<Item = String>,
{
    let argv = iter::once("rt-ngin".to_string()).chain(args);
    let flags = match Flags::from_iter_safe(argv) {
        Ok(flags) => flags,
        Err(e) if matches!(e.kind, ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed) => {
            return Ok(None);
        }
        Err(e) => bail!("{}", e.message),
    };

    let mut config = match &flags.config {
        Some(path) => RenderConfig::from_file(path)?,
        None => RenderConfig::default(),
    };
    if let Some(data_dir) = flags.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(scene) = flags.scene {
        config.scene = scene;
    }
    if let Some(output) = flags.output {
        config.output = output;
    }
    if let Some((width, height)) = flags.size {
        config.width = width;
        config.height = height;
    }
    if flags.strict {
        config.validation = Validation::Strict;
    }
    if flags.trusted {
        config.validation = Validation::Trusted;
    }
    config.window |= flags.window;

    let log_level = match (flags.verbose, flags.quiet) {
        (true, _) => log::LevelFilter::Debug,
        (_, true) => log::LevelFilter::Warn,
        _ => log::LevelFilter::Info,
    };
    Ok(Some(CliArgs { config, log_level }))
}

/// Prints the generated help text to stdout.
pub fn print_help() {
    if let Err(e) = Flags::clap().print_long_help() {
        eprintln!("Warning: Could not print help: {}", e);
    }
    println!();
}

fn parse_size(text: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = text
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size must look like 1280x720, got `{text}`"))?;
    let width: u32 = width.trim().parse().context("invalid width")?;
    let height: u32 = height.trim().parse().context("invalid height")?;
    if width == 0 || height == 0 {
        bail!("size must be non-zero, got `{text}`");
    }
    Ok((width, height))
}
