// SPDX-License-Identifier: CEPL-1.0
pub use winit;

use prism_render::{RenderSize, SurfaceProvider};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use winit::window::Window;

/// A winit window handed to the renderer as its drawable surface.
pub struct HostWindow {
    window: Window,
}

impl HostWindow {
    pub fn new(window: Window) -> Self {
        let size = window.inner_size();
        tracing::debug!(
            "host window {:?} ({}x{} px, scale {})",
            window.id(),
            size.width,
            size.height,
            window.scale_factor()
        );
        Self { window }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasWindowHandle for HostWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for HostWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl SurfaceProvider for HostWindow {
    fn drawable_size(&self) -> RenderSize {
        let size = self.window.inner_size();
        RenderSize {
            width: size.width,
            height: size.height,
        }
    }
}
