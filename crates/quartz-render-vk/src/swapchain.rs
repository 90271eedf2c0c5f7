//! Swapchain negotiation and lifecycle.

use ash::khr::{surface, swapchain};
use ash::vk;
use tracing::info;

use quartz_render::RenderSize;

use crate::context::QueueFamilies;
use crate::error::{Result, VkOp};

/// Everything the surface reports about swapchain construction. Queried
/// fresh per physical device during selection and again to finalize the
/// swapchain parameters; a pure query with no side effects.
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub(crate) unsafe fn query(
        surface_loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surf: vk::SurfaceKHR,
    ) -> Result<Self> {
        let capabilities = surface_loader
            .get_physical_device_surface_capabilities(phys, surf)
            .op("get_physical_device_surface_capabilities")?;
        let formats = surface_loader
            .get_physical_device_surface_formats(phys, surf)
            .op("get_physical_device_surface_formats")?;
        let present_modes = surface_loader
            .get_physical_device_surface_present_modes(phys, surf)
            .op("get_physical_device_surface_present_modes")?;
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// A device is usable only if it exposes at least one format and one
    /// present mode for the surface.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or_else(|| formats[0])
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum (for acquire/present overlap), capped by the
/// maximum when the surface reports one (0 == no cap).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

// Info only
fn fmt_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        _ => "OTHER",
    }
}
fn pm_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

/// The swapchain with its images and views; the unit a resize rebuild
/// would tear down and recreate.
pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

impl Swapchain {
    pub(crate) unsafe fn create(
        device: &ash::Device,
        loader: &swapchain::Device,
        support: &SwapchainSupport,
        surf: vk::SurfaceKHR,
        framebuffer: RenderSize,
        families: QueueFamilies,
    ) -> Result<Self> {
        let surf_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, framebuffer);
        let min_count = image_count(&support.capabilities);

        let family_indices = families.unique();
        let concurrent = family_indices.len() > 1;

        let mut info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surf,
            min_image_count: min_count,
            image_format: surf_format.format,
            image_color_space: surf_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform: support.capabilities.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE, // obscured pixels need not be rendered correctly
            ..Default::default()
        };
        if concurrent {
            // Graphics and present live on different families; the images
            // are touched by both without ownership transfers.
            info.image_sharing_mode = vk::SharingMode::CONCURRENT;
            info.queue_family_index_count = family_indices.len() as u32;
            info.p_queue_family_indices = family_indices.as_ptr();
        }

        let handle = loader.create_swapchain(&info, None).op("create_swapchain")?;
        // The driver may hand back more images than requested.
        let images = loader
            .get_swapchain_images(handle)
            .op("get_swapchain_images")?;
        let image_views = create_image_views(device, &images, surf_format.format)?;

        info!(
            "swapchain ready: {} {} {}x{}, {} images (min {})",
            fmt_name(surf_format.format),
            pm_name(present_mode),
            extent.width,
            extent.height,
            images.len(),
            min_count
        );

        Ok(Self {
            handle,
            format: surf_format.format,
            extent,
            images,
            image_views,
        })
    }

    /// Reverse-order teardown of everything this unit owns.
    pub(crate) unsafe fn destroy(&self, device: &ash::Device, loader: &swapchain::Device) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        loader.destroy_swapchain(self.handle, None);
    }
}

unsafe fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        views.push(device.create_image_view(&info, None).op("create_image_view")?);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min_count: u32, max_count: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    fn format(f: vk::Format, cs: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: f,
            color_space: cs,
        }
    }

    #[test]
    fn preferred_format_picked_when_present() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_format_wins_when_preferred_absent() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn mailbox_preferred_regardless_of_order() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_fallback_without_mailbox() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn definite_current_extent_taken_verbatim() {
        let caps = caps(2, 0, (1024, 768));
        let extent = choose_extent(
            &caps,
            RenderSize {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn sentinel_extent_derived_from_framebuffer_and_clamped() {
        let mut c = caps(2, 0, (u32::MAX, u32::MAX));
        let extent = choose_extent(
            &c,
            RenderSize {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (800, 600));

        c.max_image_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = choose_extent(
            &c,
            RenderSize {
                width: 800,
                height: 600,
            },
        );
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn image_count_one_above_minimum_when_unbounded() {
        assert_eq!(image_count(&caps(2, 0, (0, 0))), 3);
    }

    #[test]
    fn image_count_clamped_by_maximum() {
        assert_eq!(image_count(&caps(2, 2, (0, 0))), 2);
        assert_eq!(image_count(&caps(2, 8, (0, 0))), 3);
    }

    // Same capabilities input, same negotiated parameters, every time.
    #[test]
    fn negotiation_is_deterministic() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let modes = [vk::PresentModeKHR::FIFO];
        let c = caps(2, 0, (u32::MAX, u32::MAX));
        let fb = RenderSize {
            width: 800,
            height: 600,
        };

        for _ in 0..2 {
            assert_eq!(
                choose_surface_format(&formats).format,
                vk::Format::B8G8R8A8_SRGB
            );
            assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
            let e = choose_extent(&c, fb);
            assert_eq!((e.width, e.height), (800, 600));
            assert_eq!(image_count(&c), 3);
        }
    }
}
