// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use prism_render::{Renderer, RendererDesc, SurfaceProvider};
use tracing::{info, trace};

pub mod commands;
pub mod context;
pub mod deletion;
pub mod device;
pub mod error;
pub mod frame;
pub mod memory;
pub mod pipeline;
pub mod shaders;
pub mod swapchain;

pub use deletion::DeletionStack;
pub use device::{AdapterRequirements, QueueSearch};
pub use error::{EngineError, EngineResult, ErrorKind, Recovery};
pub use frame::{FrameReport, MAX_FRAMES_IN_FLIGHT};
pub use shaders::EmbeddedShaders;

use commands::DrawRecording;
use context::VkContext;
use frame::{FrameScheduler, VkFrameBackend};
use memory::{DeviceBuffer, TransferContext};
use pipeline::PipelineState;
use swapchain::SwapchainState;

/// Adapter policy knobs not covered by `RendererDesc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct VkOptions {
    pub allow_integrated_gpu: bool,
    pub queue_search: QueueSearch,
}

impl VkOptions {
    pub fn requirements(&self) -> AdapterRequirements {
        let mut req = AdapterRequirements {
            queue_search: self.queue_search,
            ..Default::default()
        };
        if self.allow_integrated_gpu {
            req.device_types.push(vk::PhysicalDeviceType::INTEGRATED_GPU);
        }
        req
    }
}

pub struct VkRenderer {
    ctx: VkContext,
    swapchain: SwapchainState,
    pipeline: PipelineState,
    vertex_buffer: DeviceBuffer,
    index_buffer: DeviceBuffer,
    command_buffers: Vec<vk::CommandBuffer>,
    scheduler: FrameScheduler,
    // every handle above is released through here, newest first
    stack: DeletionStack,
    released: bool,
}

impl VkRenderer {
    /// Builds the whole engine: context, swapchain, pipeline, geometry,
    /// pre-recorded commands and frame slots. Anything created before a
    /// failure is released before the error is returned.
    pub fn init_with(
        host: &dyn SurfaceProvider,
        desc: &RendererDesc<'_>,
        opts: VkOptions,
    ) -> EngineResult<Self> {
        let mut stack = DeletionStack::new();
        unsafe {
            let ctx = context::create_context(
                host,
                desc.app_name,
                desc.validation,
                &opts.requirements(),
                &mut stack,
            )?;

            let mut sc = swapchain::create_swapchain(
                &ctx.surface_loader,
                &ctx.swapchain_loader,
                &ctx.device,
                &ctx.selection,
                ctx.surface,
                host.drawable_size(),
                &mut stack,
            )?;

            let render_pass = pipeline::build_render_pass(&ctx.device, sc.format, &mut stack)?;
            swapchain::create_framebuffers(&ctx.device, &mut sc, render_pass, &mut stack)?;
            let (layout, pipe) = pipeline::build_pipeline(
                &ctx.device,
                render_pass,
                sc.extent,
                desc.shaders,
                &mut stack,
            )?;
            let pipeline = PipelineState {
                render_pass,
                layout,
                pipeline: pipe,
            };

            let pool = commands::create_command_pool(
                &ctx.device,
                ctx.selection.queues.graphics,
                &mut stack,
            )?;
            let slots = frame::create_frame_slots(&ctx.device, &mut stack)?;

            let transfer = TransferContext {
                instance: &ctx.instance,
                device: &ctx.device,
                physical_device: ctx.selection.physical_device,
                queue: ctx.graphics_queue,
                command_pool: pool,
            };
            let vertex_buffer = upload_geometry(
                &transfer,
                desc.mesh.vertex_bytes(),
                vk::BufferUsageFlags::VERTEX_BUFFER,
                "vertex buffer",
                &mut stack,
            )?;
            let index_buffer = upload_geometry(
                &transfer,
                desc.mesh.index_bytes(),
                vk::BufferUsageFlags::INDEX_BUFFER,
                "index buffer",
                &mut stack,
            )?;

            let command_buffers = commands::record_draw_commands(
                &ctx.device,
                pool,
                &sc.framebuffers,
                &DrawRecording {
                    pipeline: &pipeline,
                    extent: sc.extent,
                    clear_color: desc.clear_color,
                    vertex_buffer: &vertex_buffer,
                    index_buffer: &index_buffer,
                    index_count: desc.mesh.index_count(),
                },
            )?;

            let scheduler = FrameScheduler::new(slots, sc.image_count());

            info!(
                "renderer ready: {} images, {} indices, {} objects tracked",
                sc.image_count(),
                desc.mesh.index_count(),
                stack.len()
            );

            Ok(Self {
                ctx,
                swapchain: sc,
                pipeline,
                vertex_buffer,
                index_buffer,
                command_buffers,
                scheduler,
                stack,
                released: false,
            })
        }
    }

    pub fn draw_frame(&mut self) -> EngineResult<FrameReport> {
        let mut gpu = VkFrameBackend {
            device: &self.ctx.device,
            swap_d: &self.ctx.swapchain_loader,
            swapchain: self.swapchain.swapchain,
            graphics_queue: self.ctx.graphics_queue,
            present_queue: self.ctx.present_queue,
            command_buffers: &self.command_buffers,
        };
        self.scheduler.draw_frame(&mut gpu)
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.selection.name
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.scheduler.frames_drawn()
    }

    /// Waits for the device to go idle, then releases everything in reverse
    /// creation order. Objects are released even when the wait fails.
    pub fn release(&mut self) -> EngineResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let idle = unsafe { self.ctx.device.device_wait_idle() };
        trace!(
            "releasing {} objects (vertex {:?}, index {:?}, pipeline {:?})",
            self.stack.len(),
            self.vertex_buffer.buffer,
            self.index_buffer.buffer,
            self.pipeline.pipeline
        );
        self.stack.flush();
        idle.map_err(EngineError::WaitIdle)
    }
}

unsafe fn upload_geometry(
    transfer: &TransferContext<'_>,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    label: &'static str,
    stack: &mut DeletionStack,
) -> EngineResult<DeviceBuffer> {
    let buf = memory::upload_to_device_local_buffer(transfer, bytes, usage)?;
    let dev = transfer.device.clone();
    stack.push(label, move || unsafe { memory::destroy_buffer(&dev, buf) });
    Ok(buf)
}

impl Renderer for VkRenderer {
    fn init(host: &dyn SurfaceProvider, desc: &RendererDesc<'_>) -> Result<Self> {
        Ok(Self::init_with(host, desc, VkOptions::default())?)
    }

    fn render(&mut self) -> Result<()> {
        self.draw_frame()?;
        Ok(())
    }

    fn clean_up(mut self) -> Result<()> {
        self.release()?;
        Ok(())
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("renderer dropped with errors: {e}");
        }
    }
}
