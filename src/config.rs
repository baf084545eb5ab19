use tracing::warn;

use crate::error::{Result, StagingError};

/// Used when the host's available memory cannot be queried.
const FALLBACK_EMULATED_MEMORY: u64 = 1024 * 1024 * 1024;

pub const DEFAULT_PARALLEL_THRESHOLD: usize = 32 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub enum BackendKind {
    /// Simulated accelerator. `None` sizes it from the host's available memory.
    Emulated { capacity_bytes: Option<u64> },
    /// Vulkan compute device, by physical device index. Requires the `vulkan` feature.
    Vulkan { device_index: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContextConfig {
    pub backend: BackendKind,
    /// Share of the device's memory that allocations may use.
    pub memory_fraction: f64,
    /// Extra attempts for a failed host/device copy before the error is surfaced.
    pub transfer_retries: u32,
    /// Element count below which kernels run on a single thread.
    pub parallel_threshold: usize,
}

impl ContextConfig {
    pub fn emulated(capacity_bytes: u64) -> Self {
        Self {
            backend: BackendKind::Emulated {
                capacity_bytes: Some(capacity_bytes),
            },
            memory_fraction: 1.0,
            ..Default::default()
        }
    }

    pub fn vulkan(device_index: usize) -> Self {
        Self {
            backend: BackendKind::Vulkan { device_index },
            ..Default::default()
        }
    }

    pub fn build(self) -> Result<Self> {
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(StagingError::InvalidConfig(format!(
                "memory_fraction must be in (0, 1], got {}",
                self.memory_fraction
            )));
        }

        match self.backend {
            BackendKind::Emulated {
                capacity_bytes: Some(0),
            } => {
                return Err(StagingError::InvalidConfig(
                    "emulated device capacity must be positive".to_string(),
                ));
            }
            BackendKind::Vulkan { .. } if !cfg!(feature = "vulkan") => {
                return Err(StagingError::InvalidConfig(
                    "Vulkan backend requested but built without the `vulkan` feature".to_string(),
                ));
            }
            _ => {}
        }

        Ok(self)
    }

    /// Emulated device size: the configured capacity or the host's available memory.
    pub fn emulated_capacity(&self) -> u64 {
        match self.backend {
            BackendKind::Emulated {
                capacity_bytes: Some(bytes),
            } => bytes,
            _ => host_available_memory(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Emulated {
                capacity_bytes: None,
            },
            memory_fraction: 0.6,
            transfer_retries: 0,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

pub fn host_available_memory() -> u64 {
    match sys_info::mem_info() {
        Ok(info) if info.avail > 0 => info.avail * 1024,
        Ok(_) => FALLBACK_EMULATED_MEMORY,
        Err(e) => {
            warn!("Could not query host memory ({}), assuming 1 GiB", e);
            FALLBACK_EMULATED_MEMORY
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ContextConfig::default().build().unwrap();
        assert_eq!(config.memory_fraction, 0.6);
        assert!(config.emulated_capacity() > 0);
    }

    #[test]
    fn rejects_bad_fraction() {
        for fraction in [0.0, -0.5, 1.5, f64::NAN] {
            let config = ContextConfig {
                memory_fraction: fraction,
                ..Default::default()
            };
            assert!(matches!(
                config.build(),
                Err(StagingError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(ContextConfig::emulated(0).build().is_err());
        assert_eq!(ContextConfig::emulated(64).build().unwrap().emulated_capacity(), 64);
    }

    #[cfg(not(feature = "vulkan"))]
    #[test]
    fn vulkan_needs_feature() {
        assert!(matches!(
            ContextConfig::vulkan(0).build(),
            Err(StagingError::InvalidConfig(_))
        ));
    }
}
