// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod mesh;
mod shader;

pub use mesh::{signed_area, winding, Mesh, MeshError, Vertex, Winding};
pub use shader::{ShaderDir, ShaderSource, FRAGMENT_SHADER, VERTEX_SHADER};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

/// The host window as seen by a renderer: raw handles for surface creation
/// plus the drawable size in physical pixels.
pub trait SurfaceProvider: HasWindowHandle + HasDisplayHandle {
    fn drawable_size(&self) -> RenderSize;
}

/// Everything a renderer needs besides the window.
pub struct RendererDesc<'a> {
    pub app_name: &'a str,
    pub mesh: &'a Mesh,
    pub shaders: &'a dyn ShaderSource,
    pub clear_color: [f32; 4],
    /// Request API validation layers when the loader has them.
    pub validation: bool,
}

pub trait Renderer {
    fn init(host: &dyn SurfaceProvider, desc: &RendererDesc<'_>) -> Result<Self>
    where
        Self: Sized;

    /// Per-frame logic hook, runs before `render`.
    fn update(&mut self) {}

    /// Draws exactly one frame.
    fn render(&mut self) -> Result<()>;

    /// Releases every GPU object created by `init`.
    fn clean_up(self) -> Result<()>
    where
        Self: Sized;
}
