use ash::vk;
use log::{info, warn};

use super::device::{GpuDevice, SurfaceSupport, SwapchainDesc};
use super::{RenderError, RenderResult};
use crate::config::PresentModePreference;

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// 8-bit sRGB BGRA when offered, otherwise whatever the surface lists first.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> RenderResult<vk::SurfaceFormatKHR> {
    let preferred = available.iter().any(|candidate| {
        candidate.format == PREFERRED_FORMAT.format
            && candidate.color_space == PREFERRED_FORMAT.color_space
    });
    if preferred {
        return Ok(PREFERRED_FORMAT);
    }
    let first = available
        .first()
        .copied()
        .ok_or_else(|| RenderError::Configuration("surface reports no formats".into()))?;
    warn!(
        "Preferred surface format unavailable, using {:?}/{:?}",
        first.format, first.color_space
    );
    Ok(first)
}

pub fn choose_present_mode(
    preference: PresentModePreference,
    available: &[vk::PresentModeKHR],
) -> vk::PresentModeKHR {
    let chosen = preference
        .candidates()
        .iter()
        .copied()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO);
    if chosen != preference.candidates()[0] {
        warn!("Present mode {:?} unavailable, falling back to {:?}", preference, chosen);
    }
    chosen
}

/// The surface's current extent, unless it reports the `u32::MAX` sentinel
/// meaning "whatever the swapchain asks for", in which case the request is
/// clamped to the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    vk::Extent2D {
        width: requested.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: requested.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum so the driver never stalls us, raised to
/// `frames_in_flight`, capped at the maximum (0 means no maximum).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, frames_in_flight: u32) -> u32 {
    let desired = (capabilities.min_image_count + 1).max(frames_in_flight);
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

pub fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub struct Swapchain {
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Creates the swap object, handing over from `old_swapchain` when it is not null.
    /// The caller still owns and must destroy the old one.
    pub fn new<D: GpuDevice>(
        device: &D,
        support: &SurfaceSupport,
        preference: PresentModePreference,
        extent: vk::Extent2D,
        frames_in_flight: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RenderResult<Swapchain> {
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(preference, &support.present_modes);
        let min_image_count = choose_image_count(&support.capabilities, frames_in_flight);

        let handle = device.create_swapchain(&SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            min_image_count,
            pre_transform: support.capabilities.current_transform,
            old_swapchain,
        })?;

        let images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(err) => {
                device.destroy_swapchain(handle);
                return Err(err);
            }
        };

        info!(
            "Swapchain: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            images.len()
        );

        Ok(Swapchain {
            handle,
            images,
            surface_format,
            present_mode,
            extent,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn destroy<D: GpuDevice>(self, device: &D) {
        device.destroy_swapchain(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::HeadlessDevice;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 16,
                height: 16,
            },
            max_image_extent: vk::Extent2D {
                width: 2048,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_surface_format_preference() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(
            choose_surface_format(&[unorm, PREFERRED_FORMAT]).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
        assert_eq!(
            choose_surface_format(&[unorm]).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_err());
    }

    #[test]
    fn test_present_mode_fallback() {
        let fifo_only = [vk::PresentModeKHR::FIFO];
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(PresentModePreference::LowLatency, &both),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(PresentModePreference::LowLatency, &fifo_only),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(
            choose_present_mode(PresentModePreference::Vsync, &both),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_extent_sentinel_and_clamp() {
        let requested = vk::Extent2D {
            width: 4000,
            height: 8,
        };
        assert_eq!(
            choose_extent(&caps(2, 3), requested),
            vk::Extent2D {
                width: 2048,
                height: 16
            }
        );

        let mut fixed = caps(2, 3);
        fixed.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(choose_extent(&fixed, requested), fixed.current_extent);
    }

    #[test]
    fn test_image_count() {
        assert_eq!(choose_image_count(&caps(1, 3), 2), 2);
        assert_eq!(choose_image_count(&caps(2, 3), 2), 3);
        assert_eq!(choose_image_count(&caps(2, 3), 5), 3);
        assert_eq!(choose_image_count(&caps(2, 0), 5), 5);
    }

    #[test]
    fn test_create_chains_old_swapchain() {
        let device = HeadlessDevice::new();
        let support = device.surface_support().unwrap();
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };

        let first = Swapchain::new(
            &device,
            &support,
            PresentModePreference::LowLatency,
            extent,
            2,
            vk::SwapchainKHR::null(),
        )
        .unwrap();
        assert_eq!(first.image_count(), 2);
        assert_eq!(first.present_mode, vk::PresentModeKHR::MAILBOX);

        let second = Swapchain::new(
            &device,
            &support,
            PresentModePreference::LowLatency,
            extent,
            2,
            first.handle,
        )
        .unwrap();
        assert_eq!(
            device.last_swapchain_desc().unwrap().old_swapchain,
            first.handle
        );

        first.destroy(&device);
        second.destroy(&device);
        assert_eq!(device.live_objects().swapchains, 0);
    }
}
