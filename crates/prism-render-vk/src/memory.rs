// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// A buffer bound 1:1 to its own allocation at offset 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

/// What a host-to-device copy needs: the device, its graphics queue and a
/// pool to draw the one-shot command buffer from.
pub struct TransferContext<'a> {
    pub instance: &'a ash::Instance,
    pub device: &'a ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

/// First type allowed by `type_bits` whose flags include all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> EngineResult<u32> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(EngineError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

/// # Safety
/// `ctx.device` must be live. The caller owns the result and must pass it to
/// `destroy_buffer`.
pub unsafe fn create_buffer(
    ctx: &TransferContext<'_>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    props: vk::MemoryPropertyFlags,
) -> EngineResult<DeviceBuffer> {
    let device = ctx.device;
    let bci = vk::BufferCreateInfo {
        s_type: vk::StructureType::BUFFER_CREATE_INFO,
        size,
        usage,
        sharing_mode: vk::SharingMode::EXCLUSIVE,
        ..Default::default()
    };
    let buffer = device
        .create_buffer(&bci, None)
        .map_err(EngineError::BufferCreation)?;

    let req = device.get_buffer_memory_requirements(buffer);
    let mem_props = ctx
        .instance
        .get_physical_device_memory_properties(ctx.physical_device);
    let memory_type_index = match find_memory_type(&mem_props, req.memory_type_bits, props) {
        Ok(i) => i,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(e);
        }
    };

    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: req.size,
        memory_type_index,
        ..Default::default()
    };
    let memory = match device.allocate_memory(&mai, None) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_buffer(buffer, None);
            return Err(EngineError::MemoryAllocation(e));
        }
    };

    let out = DeviceBuffer {
        buffer,
        memory,
        size,
    };
    if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
        destroy_buffer(device, out);
        return Err(EngineError::MemoryAllocation(e));
    }
    Ok(out)
}

/// # Safety
/// No pending GPU work may reference `buf`.
pub unsafe fn destroy_buffer(device: &ash::Device, buf: DeviceBuffer) {
    device.destroy_buffer(buf.buffer, None);
    device.free_memory(buf.memory, None);
}

unsafe fn create_staging(
    ctx: &TransferContext<'_>,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> EngineResult<DeviceBuffer> {
    create_buffer(
        ctx,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )
}

/// Records `record` into a one-time command buffer, submits it to the
/// transfer queue and waits for the queue to drain. The command buffer is
/// freed on every path.
unsafe fn one_shot<F>(ctx: &TransferContext<'_>, record: F) -> EngineResult<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    let device = ctx.device;
    let ai = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: ctx.command_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let cmd = device
        .allocate_command_buffers(&ai)
        .map_err(EngineError::Transfer)?[0];

    let submit = || -> Result<(), vk::Result> {
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device.begin_command_buffer(cmd, &bi)?;
        record(cmd);
        device.end_command_buffer(cmd)?;

        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            ..Default::default()
        };
        device.queue_submit(ctx.queue, std::slice::from_ref(&si), vk::Fence::null())?;
        device.queue_wait_idle(ctx.queue)
    };
    let result = submit();

    device.free_command_buffers(ctx.command_pool, std::slice::from_ref(&cmd));
    result.map_err(EngineError::Transfer)
}

unsafe fn copy_buffer(
    ctx: &TransferContext<'_>,
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
) -> EngineResult<()> {
    one_shot(ctx, |cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        ctx.device
            .cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
    })
}

unsafe fn fill_staging(
    device: &ash::Device,
    staging: &DeviceBuffer,
    data: &[u8],
) -> EngineResult<()> {
    let ptr = device
        .map_memory(staging.memory, 0, staging.size, vk::MemoryMapFlags::empty())
        .map_err(EngineError::MemoryMapping)?;
    std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
    device.unmap_memory(staging.memory);
    Ok(())
}

/// Copies `data` into a new device-local buffer through a host-visible
/// staging buffer. Blocks until the copy has finished. The staging buffer is
/// released before returning, on success and on failure.
///
/// # Safety
/// `ctx` must describe a live device; `ctx.queue` must support transfers.
pub unsafe fn upload_to_device_local_buffer(
    ctx: &TransferContext<'_>,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> EngineResult<DeviceBuffer> {
    if data.is_empty() {
        return Err(EngineError::EmptyUpload);
    }
    let size = data.len() as vk::DeviceSize;

    let staging = create_staging(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    let result = (|| -> EngineResult<DeviceBuffer> {
        fill_staging(ctx.device, &staging, data)?;
        let dst = create_buffer(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        if let Err(e) = copy_buffer(ctx, staging.buffer, dst.buffer, size) {
            destroy_buffer(ctx.device, dst);
            return Err(e);
        }
        Ok(dst)
    })();
    destroy_buffer(ctx.device, staging);

    if result.is_ok() {
        debug!("uploaded {size} bytes ({usage:?})");
    }
    result
}

/// Copies a device-local buffer back to host memory. The source must have
/// been created with `TRANSFER_SRC`.
///
/// # Safety
/// No pending GPU writes may target `src`.
pub unsafe fn read_back(ctx: &TransferContext<'_>, src: &DeviceBuffer) -> EngineResult<Vec<u8>> {
    let staging = create_staging(ctx, src.size, vk::BufferUsageFlags::TRANSFER_DST)?;
    let result = (|| -> EngineResult<Vec<u8>> {
        copy_buffer(ctx, src.buffer, staging.buffer, src.size)?;
        let ptr = ctx
            .device
            .map_memory(staging.memory, 0, staging.size, vk::MemoryMapFlags::empty())
            .map_err(EngineError::MemoryMapping)?;
        let bytes = std::slice::from_raw_parts(ptr.cast::<u8>(), src.size as usize).to_vec();
        ctx.device.unmap_memory(staging.memory);
        Ok(bytes)
    })();
    destroy_buffer(ctx.device, staging);
    result
}
