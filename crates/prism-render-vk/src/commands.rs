// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::deletion::DeletionStack;
use crate::error::{EngineError, EngineResult};
use crate::memory::DeviceBuffer;
use crate::pipeline::PipelineState;

/// What a pre-recorded draw binds.
pub struct DrawRecording<'a> {
    pub pipeline: &'a PipelineState,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub vertex_buffer: &'a DeviceBuffer,
    pub index_buffer: &'a DeviceBuffer,
    pub index_count: u32,
}

/// Pool on the graphics family. Destroying it frees every buffer drawn from it.
///
/// # Safety
/// `device` must be live and own `queue_family`.
pub unsafe fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
    stack: &mut DeletionStack,
) -> EngineResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        ..Default::default()
    };
    let pool = device
        .create_command_pool(&pool_info, None)
        .map_err(EngineError::CommandRecording)?;
    let dev = device.clone();
    stack.push("command pool", move || unsafe {
        dev.destroy_command_pool(pool, None)
    });
    Ok(pool)
}

/// One primary buffer per framebuffer, each recorded once and replayed every
/// time its image comes up.
///
/// # Safety
/// All handles in `draw` must be live; `framebuffers` must match `draw.pipeline.render_pass`.
pub unsafe fn record_draw_commands(
    device: &ash::Device,
    pool: vk::CommandPool,
    framebuffers: &[vk::Framebuffer],
    draw: &DrawRecording<'_>,
) -> EngineResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: framebuffers.len() as u32,
        ..Default::default()
    };
    let buffers = device
        .allocate_command_buffers(&alloc_info)
        .map_err(EngineError::CommandRecording)?;

    for (&cmd, &framebuffer) in buffers.iter().zip(framebuffers) {
        record_one(device, cmd, framebuffer, draw).map_err(EngineError::CommandRecording)?;
    }
    Ok(buffers)
}

unsafe fn record_one(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    draw: &DrawRecording<'_>,
) -> ash::prelude::VkResult<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    let clear = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: draw.clear_color,
        },
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: draw.pipeline.render_pass,
        framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: draw.extent,
        },
        clear_value_count: 1,
        p_clear_values: &clear,
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline.pipeline);
    device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer.buffer], &[0]);
    device.cmd_bind_index_buffer(cmd, draw.index_buffer.buffer, 0, vk::IndexType::UINT32);
    device.cmd_draw_indexed(cmd, draw.index_count, 1, 0, 0, 0);
    device.cmd_end_render_pass(cmd);

    device.end_command_buffer(cmd)
}
