// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use prism_core::init_tracing;
use prism_platform::HostWindow;
use prism_render::{Mesh, Renderer, RendererDesc, ShaderDir, ShaderSource};
use prism_render_vk::{EmbeddedShaders, VkRenderer};
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

mod config;

use config::{load_cfg, AppCfg};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, default_value = "prism.toml")]
    config: PathBuf,

    /// Load `vertex.spv` / `fragment.spv` from this directory instead of the embedded ones
    #[arg(long)]
    shader_dir: Option<PathBuf>,

    /// Exit after this many rendered frames
    #[arg(long)]
    frames: Option<u64>,

    /// Enable Vulkan validation layers
    #[arg(long)]
    validation: bool,
}

struct App {
    cfg: AppCfg,
    frame_limit: Option<u64>,
    mesh: Mesh,

    // renderer before window: the surface must go first
    renderer: Option<VkRenderer>,
    window: Option<HostWindow>,

    exiting: bool,
    fatal: Option<anyhow::Error>,
    frames: u32,
    total_frames: u64,
    last_fps_instant: Instant,
}

impl App {
    fn new(cfg: AppCfg, frame_limit: Option<u64>) -> Self {
        App {
            cfg,
            frame_limit,
            mesh: Mesh::quad(),
            renderer: None,
            window: None,
            exiting: false,
            fatal: None,
            frames: 0,
            total_frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(
                self.cfg.window.width,
                self.cfg.window.height,
            ));
        let host = HostWindow::new(event_loop.create_window(attrs).context("create_window")?);

        let shader_dir = self.cfg.render.shader_dir.as_ref().map(ShaderDir::new);
        let shaders: &dyn ShaderSource = match &shader_dir {
            Some(dir) => {
                info!("shaders from {}", dir.root().display());
                dir
            }
            None => &EmbeddedShaders,
        };

        let desc = RendererDesc {
            app_name: &self.cfg.window.title,
            mesh: &self.mesh,
            shaders,
            clear_color: self.cfg.render.clear_color,
            validation: self.cfg.render.validation,
        };
        let renderer = VkRenderer::init_with(&host, &desc, self.cfg.render.vk_options())
            .context("vulkan init")?;
        info!(
            "adapter = {}, extent = {}x{}, images = {}",
            renderer.adapter_name(),
            renderer.extent().width,
            renderer.extent().height,
            renderer.image_count()
        );

        self.renderer = Some(renderer);
        self.window = Some(host);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal.get_or_insert(err);
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.clean_up() {
                error!("clean_up: {e:#}");
                self.fatal.get_or_insert(e);
            }
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.start(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        event_loop.set_control_flow(ControlFlow::Poll);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(host) = &self.window {
            if window_id != host.window().id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested after {} frames", self.total_frames);
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };

                renderer.update();
                if let Err(e) = renderer.render() {
                    self.fail(event_loop, e.context("render"));
                    return;
                }

                self.frames = self.frames.saturating_add(1);
                self.total_frames += 1;
                if self.frame_limit.is_some_and(|n| self.total_frames >= n) {
                    info!("rendered {} frames, exiting", self.total_frames);
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if let Some(host) = &self.window {
            host.window().request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = load_cfg(&args.config);
    if args.validation {
        cfg.render.validation = true;
    }
    if let Some(dir) = args.shader_dir {
        cfg.render.shader_dir = Some(dir);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg, args.frames);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
