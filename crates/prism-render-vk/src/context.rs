// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry};
use prism_render::SurfaceProvider;
use tracing::{debug, error, info, trace, warn};

use crate::deletion::DeletionStack;
use crate::device::{self, AdapterRequirements, AdapterSelection};
use crate::error::{EngineError, EngineResult};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance-level and device-level roots every other component hangs off.
pub struct VkContext {
    pub entry: Entry,
    pub instance: ash::Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub selection: AdapterSelection,
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub validation: bool,
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(target: "vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(target: "vulkan", "[{types:?}] {msg}")
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            debug!(target: "vulkan", "[{types:?}] {msg}")
        }
        _ => trace!(target: "vulkan", "[{types:?}] {msg}"),
    }
    vk::FALSE
}

fn has_validation_layer(entry: &Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str() == Ok(VALIDATION_LAYER))
}

unsafe fn create_instance(
    entry: &Entry,
    host: &dyn SurfaceProvider,
    app_name: &str,
    validation: bool,
) -> EngineResult<ash::Instance> {
    let app = CString::new(app_name).unwrap_or_else(|_| c"prism".to_owned());
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: c"prism".as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let display_raw = host.display_handle()?.as_raw();
    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .map_err(EngineError::InstanceCreation)?
        .to_vec();
    let layers: Vec<*const c_char> = if validation {
        extensions.push(debug_utils::NAME.as_ptr());
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    entry
        .create_instance(&create_info, None)
        .map_err(EngineError::InstanceCreation)
}

unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
    stack: &mut DeletionStack,
) -> EngineResult<()> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .map_err(EngineError::InstanceCreation)?;
    stack.push("debug messenger", move || unsafe {
        loader.destroy_debug_utils_messenger(messenger, None)
    });
    Ok(())
}

/// Loads Vulkan, creates the instance, surface and logical device, and
/// registers each on `stack` as soon as it exists.
///
/// Instance first, then the surface from that instance, then the adapter is
/// chosen against that surface, then the device.
///
/// # Safety
/// `host` must outlive the returned context.
pub unsafe fn create_context(
    host: &dyn SurfaceProvider,
    app_name: &str,
    validation: bool,
    req: &AdapterRequirements,
    stack: &mut DeletionStack,
) -> EngineResult<VkContext> {
    let entry = Entry::load()?;

    let validation = if validation && !has_validation_layer(&entry) {
        warn!("validation requested but {VALIDATION_LAYER:?} is not installed; continuing without it");
        false
    } else {
        validation
    };

    let instance = create_instance(&entry, host, app_name, validation)?;
    {
        // the closure keeps the loader library alive until the instance is gone
        let entry = entry.clone();
        let instance = instance.clone();
        stack.push("instance", move || unsafe {
            instance.destroy_instance(None);
            drop(entry);
        });
    }

    if validation {
        create_debug_messenger(&entry, &instance, stack)?;
    }

    let surface_loader = surface::Instance::new(&entry, &instance);
    let surface = ash_window::create_surface(
        &entry,
        &instance,
        host.display_handle()?.as_raw(),
        host.window_handle()?.as_raw(),
        None,
    )
    .map_err(EngineError::SurfaceCreation)?;
    {
        let loader = surface_loader.clone();
        stack.push("surface", move || unsafe {
            loader.destroy_surface(surface, None)
        });
    }

    let selection = device::select_adapter(&instance, &surface_loader, surface, req)?;
    let logical = device::create_logical_device(&instance, &selection, &req.extensions)?;
    {
        let dev = logical.device.clone();
        stack.push("device", move || unsafe { dev.destroy_device(None) });
    }
    let swapchain_loader = swapchain::Device::new(&instance, &logical.device);

    info!(
        "vulkan context ready (validation={validation}, shared_queue={})",
        selection.queues.is_shared()
    );

    Ok(VkContext {
        entry,
        instance,
        surface_loader,
        surface,
        selection,
        device: logical.device,
        swapchain_loader,
        graphics_queue: logical.graphics_queue,
        present_queue: logical.present_queue,
        validation,
    })
}
