//! wgpu ray-query backend and the window loop driving it.

pub mod app;
pub mod context;
pub mod pass;

pub use app::run;
pub use context::WgpuContext;
