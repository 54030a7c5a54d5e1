// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// How the graphics and present families are searched for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QueueSearch {
    /// First graphics family and, separately, first present-capable family.
    /// One family may fill both roles.
    #[default]
    Independent,
    /// A graphics-capable family is never considered for presentation, so
    /// the two roles always land on different families.
    GraphicsExclusive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyProbe {
    pub flags: vk::QueueFlags,
    /// Result of the surface support query for this family.
    pub present: bool,
}

/// Everything the selection logic needs to know about one adapter.
#[derive(Clone, Debug, PartialEq)]
pub struct AdapterProbe {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub extensions: Vec<CString>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
    pub queue_families: Vec<QueueFamilyProbe>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Families needing a queue create-info, each listed once.
    pub fn distinct(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

#[derive(Clone, Debug)]
pub struct AdapterRequirements {
    pub device_types: Vec<vk::PhysicalDeviceType>,
    pub extensions: Vec<&'static CStr>,
    pub queue_search: QueueSearch,
}

impl Default for AdapterRequirements {
    fn default() -> Self {
        Self {
            device_types: vec![vk::PhysicalDeviceType::DISCRETE_GPU],
            extensions: vec![swapchain::NAME],
            queue_search: QueueSearch::Independent,
        }
    }
}

/// Why an adapter was passed over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    DeviceType(vk::PhysicalDeviceType),
    MissingExtension(String),
    NoSurfaceFormat,
    NoPresentMode,
    NoQueueFamily,
}

/// The chosen adapter. Computed once and never changed.
#[derive(Clone, Debug)]
pub struct AdapterSelection {
    pub physical_device: vk::PhysicalDevice,
    pub name: String,
    pub queues: QueueFamilyIndices,
}

pub fn find_queue_families(
    families: &[QueueFamilyProbe],
    search: QueueSearch,
) -> Option<QueueFamilyIndices> {
    let mut graphics = None;
    let mut present = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let is_graphics = family.flags.contains(vk::QueueFlags::GRAPHICS);
        match search {
            QueueSearch::Independent => {
                if is_graphics && graphics.is_none() {
                    graphics = Some(i);
                }
                if family.present && present.is_none() {
                    present = Some(i);
                }
            }
            QueueSearch::GraphicsExclusive => {
                if is_graphics {
                    graphics.get_or_insert(i);
                } else if family.present {
                    present.get_or_insert(i);
                }
            }
        }
        if graphics.is_some() && present.is_some() {
            break;
        }
    }

    Some(QueueFamilyIndices {
        graphics: graphics?,
        present: present?,
    })
}

/// Checks what is known without the surface: device type, then extensions.
pub fn check_identity(probe: &AdapterProbe, req: &AdapterRequirements) -> Result<(), Rejection> {
    if !req.device_types.contains(&probe.device_type) {
        return Err(Rejection::DeviceType(probe.device_type));
    }
    if let Some(missing) = req
        .extensions
        .iter()
        .find(|want| !probe.extensions.iter().any(|have| have.as_c_str() == **want))
    {
        return Err(Rejection::MissingExtension(
            missing.to_string_lossy().into_owned(),
        ));
    }
    Ok(())
}

/// Checks one adapter against the requirements, in a fixed order:
/// device type, extensions, surface support, queue families.
pub fn evaluate_adapter(
    probe: &AdapterProbe,
    req: &AdapterRequirements,
) -> Result<QueueFamilyIndices, Rejection> {
    check_identity(probe, req)?;
    if probe.surface_format_count == 0 {
        return Err(Rejection::NoSurfaceFormat);
    }
    if probe.present_mode_count == 0 {
        return Err(Rejection::NoPresentMode);
    }
    find_queue_families(&probe.queue_families, req.queue_search).ok_or(Rejection::NoQueueFamily)
}

/// Source of adapter facts, queried one adapter at a time in platform order.
pub trait AdapterProber {
    fn adapter_count(&self) -> usize;

    /// Name, device type and extensions. Must not touch the surface.
    fn identify(&self, index: usize) -> EngineResult<AdapterProbe>;

    /// Fills in surface formats, present modes and per-family present support.
    fn query_surface(&self, index: usize, probe: &mut AdapterProbe) -> EngineResult<()>;
}

/// Pre-gathered probes; nothing left to query.
impl AdapterProber for [AdapterProbe] {
    fn adapter_count(&self) -> usize {
        self.len()
    }

    fn identify(&self, index: usize) -> EngineResult<AdapterProbe> {
        Ok(self[index].clone())
    }

    fn query_surface(&self, _index: usize, _probe: &mut AdapterProbe) -> EngineResult<()> {
        Ok(())
    }
}

/// First adapter passing every check wins; there is no scoring. Adapters
/// are examined lazily: nothing past the winner is queried, and the surface
/// is only queried for adapters whose type and extensions qualify.
pub fn choose_adapter<P: AdapterProber + ?Sized>(
    adapters: &P,
    req: &AdapterRequirements,
) -> EngineResult<(usize, AdapterProbe, QueueFamilyIndices)> {
    let mut queue_reject = None;

    for i in 0..adapters.adapter_count() {
        let mut probe = adapters.identify(i)?;
        let verdict = match check_identity(&probe, req) {
            Ok(()) => {
                adapters.query_surface(i, &mut probe)?;
                evaluate_adapter(&probe, req)
            }
            Err(why) => Err(why),
        };
        match verdict {
            Ok(queues) => return Ok((i, probe, queues)),
            Err(why) => {
                debug!("adapter `{}` rejected: {why:?}", probe.name);
                if why == Rejection::NoQueueFamily && queue_reject.is_none() {
                    queue_reject = Some(probe.name);
                }
            }
        }
    }

    Err(match queue_reject {
        Some(adapter) => EngineError::NoQueueFamily { adapter },
        None => EngineError::NoAdapter,
    })
}

struct VkAdapters<'a> {
    instance: &'a ash::Instance,
    surf_i: &'a surface::Instance,
    surface: vk::SurfaceKHR,
    devices: Vec<vk::PhysicalDevice>,
}

impl AdapterProber for VkAdapters<'_> {
    fn adapter_count(&self) -> usize {
        self.devices.len()
    }

    fn identify(&self, index: usize) -> EngineResult<AdapterProbe> {
        let phys = self.devices[index];
        unsafe {
            let props = self.instance.get_physical_device_properties(phys);
            let name = props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let extensions = self
                .instance
                .enumerate_device_extension_properties(phys)
                .map_err(EngineError::AdapterQuery)?
                .iter()
                .filter_map(|e| e.extension_name_as_c_str().ok().map(CStr::to_owned))
                .collect();

            Ok(AdapterProbe {
                name,
                device_type: props.device_type,
                extensions,
                surface_format_count: 0,
                present_mode_count: 0,
                queue_families: Vec::new(),
            })
        }
    }

    fn query_surface(&self, index: usize, probe: &mut AdapterProbe) -> EngineResult<()> {
        let phys = self.devices[index];
        unsafe {
            probe.surface_format_count = self
                .surf_i
                .get_physical_device_surface_formats(phys, self.surface)
                .map_err(EngineError::SurfaceQuery)?
                .len();
            probe.present_mode_count = self
                .surf_i
                .get_physical_device_surface_present_modes(phys, self.surface)
                .map_err(EngineError::SurfaceQuery)?
                .len();

            probe.queue_families.clear();
            for (i, q) in self
                .instance
                .get_physical_device_queue_family_properties(phys)
                .iter()
                .enumerate()
            {
                let present = self
                    .surf_i
                    .get_physical_device_surface_support(phys, i as u32, self.surface)
                    .map_err(EngineError::SurfaceQuery)?;
                probe.queue_families.push(QueueFamilyProbe {
                    flags: q.queue_flags,
                    present,
                });
            }
        }
        Ok(())
    }
}

/// Enumerates adapters in platform order and picks the first eligible one.
///
/// # Safety
/// `surface` must have been created from `instance`.
pub unsafe fn select_adapter(
    instance: &ash::Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    req: &AdapterRequirements,
) -> EngineResult<AdapterSelection> {
    let adapters = VkAdapters {
        instance,
        surf_i,
        surface,
        devices: instance
            .enumerate_physical_devices()
            .map_err(EngineError::AdapterQuery)?,
    };

    let (i, probe, queues) = choose_adapter(&adapters, req)?;
    info!(
        "adapter: {} ({:?}) graphics_family={} present_family={}",
        probe.name, probe.device_type, queues.graphics, queues.present
    );
    Ok(AdapterSelection {
        physical_device: adapters.devices[i],
        name: probe.name,
        queues,
    })
}

pub struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// Creates the device with one queue per distinct family and the required
/// extensions enabled. No optional features.
///
/// # Safety
/// `selection` must come from `select_adapter` on this `instance`.
pub unsafe fn create_logical_device(
    instance: &ash::Instance,
    selection: &AdapterSelection,
    extensions: &[&CStr],
) -> EngineResult<LogicalDevice> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = selection
        .queues
        .distinct()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let ext_ptrs: Vec<*const std::ffi::c_char> = extensions.iter().map(|e| e.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    let device = instance
        .create_device(selection.physical_device, &create_info, None)
        .map_err(EngineError::DeviceCreation)?;
    let graphics_queue = device.get_device_queue(selection.queues.graphics, 0);
    let present_queue = device.get_device_queue(selection.queues.present, 0);

    Ok(LogicalDevice {
        device,
        graphics_queue,
        present_queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn family(flags: vk::QueueFlags, present: bool) -> QueueFamilyProbe {
        QueueFamilyProbe { flags, present }
    }

    fn discrete(name: &str) -> AdapterProbe {
        AdapterProbe {
            name: name.into(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            extensions: vec![swapchain::NAME.to_owned()],
            surface_format_count: 2,
            present_mode_count: 1,
            queue_families: vec![family(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
                true,
            )],
        }
    }

    #[test]
    fn shared_family_fills_both_roles() {
        let families = [family(vk::QueueFlags::GRAPHICS, true)];
        let q = find_queue_families(&families, QueueSearch::Independent).unwrap();
        assert_eq!(q, QueueFamilyIndices { graphics: 0, present: 0 });
        assert!(q.is_shared());
        assert_eq!(q.distinct(), vec![0]);
    }

    #[test]
    fn independent_search_takes_first_of_each() {
        let families = [
            family(vk::QueueFlags::COMPUTE, false),
            family(vk::QueueFlags::GRAPHICS, false),
            family(vk::QueueFlags::TRANSFER, true),
            family(vk::QueueFlags::GRAPHICS, true),
        ];
        let q = find_queue_families(&families, QueueSearch::Independent).unwrap();
        assert_eq!(q, QueueFamilyIndices { graphics: 1, present: 2 });
        assert_eq!(q.distinct(), vec![1, 2]);
    }

    #[test]
    fn exclusive_search_skips_graphics_families_for_present() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, true),
            family(vk::QueueFlags::TRANSFER, true),
        ];
        let q = find_queue_families(&families, QueueSearch::GraphicsExclusive).unwrap();
        assert_eq!(q, QueueFamilyIndices { graphics: 0, present: 1 });

        // a lone graphics+present family is enough for one policy only
        let lone = [family(vk::QueueFlags::GRAPHICS, true)];
        assert!(find_queue_families(&lone, QueueSearch::GraphicsExclusive).is_none());
        assert!(find_queue_families(&lone, QueueSearch::Independent).is_some());
    }

    #[test]
    fn no_present_family_yields_none() {
        let families = [family(vk::QueueFlags::GRAPHICS, false)];
        assert_eq!(find_queue_families(&families, QueueSearch::Independent), None);
        assert_eq!(find_queue_families(&[], QueueSearch::Independent), None);
    }

    #[test]
    fn rejects_integrated_by_default() {
        let mut gpu = discrete("igpu");
        gpu.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let req = AdapterRequirements::default();
        assert_eq!(
            evaluate_adapter(&gpu, &req),
            Err(Rejection::DeviceType(vk::PhysicalDeviceType::INTEGRATED_GPU))
        );

        let widened = AdapterRequirements {
            device_types: vec![
                vk::PhysicalDeviceType::DISCRETE_GPU,
                vk::PhysicalDeviceType::INTEGRATED_GPU,
            ],
            ..Default::default()
        };
        assert!(evaluate_adapter(&gpu, &widened).is_ok());
    }

    #[test]
    fn rejects_adapter_without_swapchain_extension() {
        let mut gpu = discrete("no-wsi");
        gpu.extensions.clear();
        assert_eq!(
            evaluate_adapter(&gpu, &AdapterRequirements::default()),
            Err(Rejection::MissingExtension("VK_KHR_swapchain".into()))
        );
    }

    #[test]
    fn rejects_adapter_without_surface_support() {
        let mut gpu = discrete("headless");
        gpu.surface_format_count = 0;
        assert_eq!(
            evaluate_adapter(&gpu, &AdapterRequirements::default()),
            Err(Rejection::NoSurfaceFormat)
        );

        let mut gpu = discrete("headless");
        gpu.present_mode_count = 0;
        assert_eq!(
            evaluate_adapter(&gpu, &AdapterRequirements::default()),
            Err(Rejection::NoPresentMode)
        );
    }

    #[test]
    fn first_eligible_adapter_wins() {
        let mut cpu = discrete("llvmpipe");
        cpu.device_type = vk::PhysicalDeviceType::CPU;
        let probes = vec![cpu, discrete("first"), discrete("second")];

        let (i, probe, q) =
            choose_adapter(probes.as_slice(), &AdapterRequirements::default()).unwrap();
        assert_eq!(i, 1);
        assert_eq!(probe.name, "first");
        assert_eq!(q.graphics, 0);
    }

    #[test]
    fn queue_only_failure_reports_no_queue_family() {
        let mut gpu = discrete("compute-only");
        gpu.queue_families = vec![family(vk::QueueFlags::COMPUTE, true)];
        let err = choose_adapter(&[gpu][..], &AdapterRequirements::default()).unwrap_err();
        assert!(matches!(err, EngineError::NoQueueFamily { adapter } if adapter == "compute-only"));
    }

    #[test]
    fn nothing_eligible_reports_no_adapter() {
        let mut gpu = discrete("old");
        gpu.extensions.clear();
        let err = choose_adapter(&[gpu][..], &AdapterRequirements::default()).unwrap_err();
        assert!(matches!(err, EngineError::NoAdapter));
        let none: &[AdapterProbe] = &[];
        assert!(matches!(
            choose_adapter(none, &AdapterRequirements::default()),
            Err(EngineError::NoAdapter)
        ));
    }

    #[test]
    fn selected_adapter_passes_every_check() {
        let req = AdapterRequirements::default();
        let mut variants = Vec::new();
        for ty in [
            vk::PhysicalDeviceType::CPU,
            vk::PhysicalDeviceType::DISCRETE_GPU,
        ] {
            for formats in [0, 1] {
                for has_ext in [false, true] {
                    let mut p = discrete("combo");
                    p.device_type = ty;
                    p.surface_format_count = formats;
                    if !has_ext {
                        p.extensions.clear();
                    }
                    variants.push(p);
                }
            }
        }
        for p in &variants {
            if choose_adapter(std::slice::from_ref(p), &req).is_ok() {
                assert_eq!(p.device_type, vk::PhysicalDeviceType::DISCRETE_GPU);
                assert!(p.surface_format_count > 0);
                assert!(!p.extensions.is_empty());
            }
        }
    }

    /// Adapters whose surface queries can be made to fail, with a log of
    /// which adapters had their surface queried.
    struct FlakyAdapters {
        probes: Vec<AdapterProbe>,
        surface_lost: Vec<usize>,
        surface_queries: std::cell::RefCell<Vec<usize>>,
    }

    impl FlakyAdapters {
        fn new(probes: Vec<AdapterProbe>, surface_lost: Vec<usize>) -> Self {
            Self {
                probes,
                surface_lost,
                surface_queries: Default::default(),
            }
        }
    }

    impl AdapterProber for FlakyAdapters {
        fn adapter_count(&self) -> usize {
            self.probes.len()
        }

        fn identify(&self, index: usize) -> EngineResult<AdapterProbe> {
            let full = &self.probes[index];
            Ok(AdapterProbe {
                surface_format_count: 0,
                present_mode_count: 0,
                queue_families: Vec::new(),
                ..full.clone()
            })
        }

        fn query_surface(&self, index: usize, probe: &mut AdapterProbe) -> EngineResult<()> {
            self.surface_queries.borrow_mut().push(index);
            if self.surface_lost.contains(&index) {
                return Err(EngineError::SurfaceQuery(vk::Result::ERROR_SURFACE_LOST_KHR));
            }
            let full = &self.probes[index];
            probe.surface_format_count = full.surface_format_count;
            probe.present_mode_count = full.present_mode_count;
            probe.queue_families = full.queue_families.clone();
            Ok(())
        }
    }

    #[test]
    fn failing_adapter_after_the_winner_is_never_queried() {
        let adapters = FlakyAdapters::new(vec![discrete("good"), discrete("lost")], vec![1]);
        let (i, probe, _) = choose_adapter(&adapters, &AdapterRequirements::default()).unwrap();
        assert_eq!((i, probe.name.as_str()), (0, "good"));
        assert_eq!(*adapters.surface_queries.borrow(), vec![0]);
    }

    #[test]
    fn ineligible_adapter_skips_surface_queries() {
        let mut cpu = discrete("llvmpipe");
        cpu.device_type = vk::PhysicalDeviceType::CPU;
        let mut old = discrete("no-wsi");
        old.extensions.clear();
        let adapters = FlakyAdapters::new(vec![cpu, old, discrete("good")], vec![0, 1]);

        let (i, _, _) = choose_adapter(&adapters, &AdapterRequirements::default()).unwrap();
        assert_eq!(i, 2);
        assert_eq!(*adapters.surface_queries.borrow(), vec![2]);
    }

    #[test]
    fn surface_error_on_a_candidate_propagates() {
        let adapters = FlakyAdapters::new(vec![discrete("lost"), discrete("good")], vec![0]);
        let err = choose_adapter(&adapters, &AdapterRequirements::default()).unwrap_err();
        assert!(matches!(
            err,
            EngineError::SurfaceQuery(vk::Result::ERROR_SURFACE_LOST_KHR)
        ));
    }
}
