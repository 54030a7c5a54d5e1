// SPDX-License-Identifier: CEPL-1.0
use ash::khr::{surface, swapchain};
use ash::vk;
use prism_render::RenderSize;
use tracing::info;

use crate::deletion::DeletionStack;
use crate::device::{AdapterSelection, QueueFamilyIndices};
use crate::error::{EngineError, EngineResult};

/// Swapchain plus the per-image views and framebuffers built on it.
/// Images belong to the swapchain; everything else is released through the
/// deletion stack it was registered on.
#[derive(Clone, Debug)]
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainState {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// First reported entry. No preference ranking.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> EngineResult<vk::SurfaceFormatKHR> {
    formats.first().copied().ok_or(EngineError::NoSurfaceFormat)
}

/// FIFO is the only mode every implementation must support.
pub fn choose_present_mode() -> vk::PresentModeKHR {
    vk::PresentModeKHR::FIFO
}

/// `u32::MAX` in `current_extent` means the window lets the swapchain decide.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, drawable: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: drawable
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn sharing_mode(queues: &QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if queues.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![queues.graphics, queues.present],
        )
    }
}

fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::A2B10G10R10_UNORM_PACK32 => "A2B10G10R10_UNORM",
        _ => "OTHER",
    }
}

/// Creates the swapchain and one view per image. Framebuffers come later,
/// once the render pass exists (`create_framebuffers`).
///
/// # Safety
/// `surface` and `device` must belong to the adapter in `selection`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn create_swapchain(
    surf_i: &surface::Instance,
    swap_d: &swapchain::Device,
    device: &ash::Device,
    selection: &AdapterSelection,
    surface: vk::SurfaceKHR,
    drawable: RenderSize,
    stack: &mut DeletionStack,
) -> EngineResult<SwapchainState> {
    let phys = selection.physical_device;
    let caps = surf_i
        .get_physical_device_surface_capabilities(phys, surface)
        .map_err(EngineError::SurfaceQuery)?;
    let formats = surf_i
        .get_physical_device_surface_formats(phys, surface)
        .map_err(EngineError::SurfaceQuery)?;

    let surf_format = choose_surface_format(&formats)?;
    let present_mode = choose_present_mode();
    let extent = choose_extent(&caps, drawable);
    let min_count = choose_image_count(&caps);
    let (sharing, families) = sharing_mode(&selection.queues);

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: min_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing,
        queue_family_index_count: families.len() as u32,
        p_queue_family_indices: families.as_ptr(),
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain: vk::SwapchainKHR::null(),
        ..Default::default()
    };

    let handle = swap_d
        .create_swapchain(&swap_info, None)
        .map_err(EngineError::SwapchainCreation)?;
    {
        let swap_d = swap_d.clone();
        stack.push("swapchain", move || unsafe {
            swap_d.destroy_swapchain(handle, None)
        });
    }

    let images = swap_d
        .get_swapchain_images(handle)
        .map_err(EngineError::SwapchainCreation)?;

    info!(
        "swapchain: format {} / {:?}, present_mode FIFO, extent {}x{}, images(min={} -> requested={} -> got={}), sharing {:?}",
        fmt_name(surf_format.format),
        surf_format.color_space,
        extent.width,
        extent.height,
        caps.min_image_count,
        min_count,
        images.len(),
        sharing
    );

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let view_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: surf_format.format,
            components: vk::ComponentMapping::default(),
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = device
            .create_image_view(&view_info, None)
            .map_err(EngineError::ImageViewCreation)?;
        let dev = device.clone();
        stack.push("image view", move || unsafe {
            dev.destroy_image_view(view, None)
        });
        views.push(view);
    }

    Ok(SwapchainState {
        swapchain: handle,
        format: surf_format.format,
        color_space: surf_format.color_space,
        extent,
        images,
        views,
        framebuffers: Vec::new(),
    })
}

/// One framebuffer per image view, all sized to the swapchain extent.
///
/// # Safety
/// `render_pass` must be compatible with the swapchain format.
pub unsafe fn create_framebuffers(
    device: &ash::Device,
    state: &mut SwapchainState,
    render_pass: vk::RenderPass,
    stack: &mut DeletionStack,
) -> EngineResult<()> {
    let mut framebuffers = Vec::with_capacity(state.views.len());
    for view in &state.views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: state.extent.width,
            height: state.extent.height,
            layers: 1,
            ..Default::default()
        };
        let fb = device
            .create_framebuffer(&fb_info, None)
            .map_err(EngineError::FramebufferCreation)?;
        let dev = device.clone();
        stack.push("framebuffer", move || unsafe {
            dev.destroy_framebuffer(fb, None)
        });
        framebuffers.push(fb);
    }
    state.framebuffers = framebuffers;
    Ok(())
}
