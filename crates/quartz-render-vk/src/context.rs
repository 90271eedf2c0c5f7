//! Instance, diagnostics, and device/queue discovery.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use tracing::{debug, error, info, warn};

use crate::error::{RenderError, Result, VkOp};
use crate::swapchain::SwapchainSupport;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions every selected physical device must offer.
pub(crate) const DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

// STRICT ORDER:
// 1) Create VkInstance (enables platform WSI + optional debug ext)
// 2) Create VkSurfaceKHR FROM THIS INSTANCE
// 3) Query physical devices/queues AGAINST THIS SURFACE (present support)
// 4) Create VkDevice for the selected physical device
// Changing this order => surface may be incompatible with chosen device/queue.

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    diagnostics: bool,
) -> Result<Instance> {
    let app_name = CString::new("quartz").unwrap();

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: app_name.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions = ash_window::enumerate_required_extensions(display)
        .op("enumerate_required_extensions")?
        .to_vec();

    let layer_ptrs: Vec<*const c_char> = if diagnostics {
        if !validation_layer_available(entry)? {
            return Err(RenderError::DiagnosticsUnavailable);
        }
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
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: if layer_ptrs.is_empty() {
            std::ptr::null()
        } else {
            layer_ptrs.as_ptr()
        },
        ..Default::default()
    };

    entry.create_instance(&create_info, None).op("create_instance")
}

unsafe fn validation_layer_available(entry: &Entry) -> Result<bool> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .op("enumerate_instance_layer_properties")?;
    Ok(layers
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER))
}

fn message_kind(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

// Observational only: logs and returns VK_FALSE, never steering the caller.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    let kind = message_kind(types);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!("vulkan {kind}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!("vulkan {kind}: {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE) {
        debug!("vulkan {kind}: {message}");
    } else {
        info!("vulkan {kind}: {message}");
    }

    vk::FALSE
}

pub(crate) unsafe fn create_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
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
        .op("create_debug_utils_messenger")?;
    Ok((loader, messenger))
}

/// Per-family capabilities discovered against the target surface.
/// Incomplete indices disqualify the device.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        match (self.graphics, self.present) {
            (Some(graphics), Some(present)) => Some(QueueFamilies { graphics, present }),
            _ => None,
        }
    }
}

/// A resolved (graphics, present) pair. The two indices may coincide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, graphics first. Drives both the number of
    /// queue-create entries and the swapchain sharing mode.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub(crate) unsafe fn find_queue_families(
    instance: &Instance,
    surface_loader: &surface::Instance,
    phys: vk::PhysicalDevice,
    surf: vk::SurfaceKHR,
) -> Result<QueueFamilyIndices> {
    let families = instance.get_physical_device_queue_family_properties(phys);

    let mut indices = QueueFamilyIndices::default();
    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if indices.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            indices.graphics = Some(i);
        }
        if indices.present.is_none()
            && surface_loader
                .get_physical_device_surface_support(phys, i, surf)
                .op("get_physical_device_surface_support")?
        {
            indices.present = Some(i);
        }
        if indices.is_complete() {
            break;
        }
    }
    Ok(indices)
}

unsafe fn device_extensions_supported(
    instance: &Instance,
    phys: vk::PhysicalDevice,
) -> Result<bool> {
    let available = instance
        .enumerate_device_extension_properties(phys)
        .op("enumerate_device_extension_properties")?;
    Ok(DEVICE_EXTENSIONS.iter().all(|required| {
        available
            .iter()
            .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == *required)
    }))
}

/// Picks the first enumerated device with complete queue families, the
/// required extensions, and an adequate swapchain.
pub(crate) unsafe fn select_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surf: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    for phys in instance
        .enumerate_physical_devices()
        .op("enumerate_physical_devices")?
    {
        let indices = find_queue_families(instance, surface_loader, phys, surf)?;
        let Some(families) = indices.complete() else {
            continue;
        };
        if !device_extensions_supported(instance, phys)? {
            continue;
        }
        if !SwapchainSupport::query(surface_loader, phys, surf)?.is_adequate() {
            continue;
        }

        let props = instance.get_physical_device_properties(phys);
        info!(
            "selected {:?} (graphics family {}, present family {})",
            CStr::from_ptr(props.device_name.as_ptr()),
            families.graphics,
            families.present
        );
        return Ok((phys, families));
    }
    Err(RenderError::NoSuitableDevice)
}

/// Logical device plus its queues, returned as one bundle. `graphics` and
/// `present` are the same handle when the families coincide.
pub struct DeviceQueues {
    pub device: ash::Device,
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

pub(crate) unsafe fn create_device_and_queues(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<DeviceQueues> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .op("create_device")?;
    let graphics = device.get_device_queue(families.graphics, 0);
    let present = device.get_device_queue(families.present, 0);

    Ok(DeviceQueues {
        device,
        graphics,
        present,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_incomplete_until_both_found() {
        let mut indices = QueueFamilyIndices::default();
        assert!(!indices.is_complete());

        indices.graphics = Some(0);
        assert!(!indices.is_complete());
        assert!(indices.complete().is_none());

        indices.present = Some(1);
        assert!(indices.is_complete());
        assert_eq!(
            indices.complete(),
            Some(QueueFamilies {
                graphics: 0,
                present: 1
            })
        );
    }

    #[test]
    fn coincident_families_collapse_to_one_queue_entry() {
        let families = QueueFamilies {
            graphics: 2,
            present: 2,
        };
        assert_eq!(families.unique(), vec![2]);
    }

    #[test]
    fn distinct_families_keep_both_in_order() {
        let families = QueueFamilies {
            graphics: 0,
            present: 3,
        };
        assert_eq!(families.unique(), vec![0, 3]);
    }
}
