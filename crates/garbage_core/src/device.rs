//! Compute device selection.

use candle_core::Device;
use tracing::info;

/// Picks CUDA or Metal when compiled in and available, otherwise the CPU.
#[must_use]
pub fn get_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device");
            return device;
        }
    }

    info!("Using CPU");
    Device::Cpu
}
