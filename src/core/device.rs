//! Device conditions consulted before background fetching.

use std::path::Path;

use futures::future::BoxFuture;

use crate::core::models::Connectivity;

/// Host-provided view of network, power and disk state.
pub trait DeviceProbe: Send + Sync {
    fn connectivity(&self) -> BoxFuture<'_, Connectivity>;

    fn is_power_saving(&self) -> bool;

    /// Free bytes on the volume holding `path`. `None` when unknown.
    fn free_disk_bytes(&self, path: &Path) -> Option<u64>;
}

/// Probe with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct StaticDeviceProbe {
    pub connectivity: Connectivity,
    pub power_saving: bool,
    pub free_disk_bytes: Option<u64>,
}

impl StaticDeviceProbe {
    /// On Wi-Fi, not power saving, free space unknown.
    #[must_use]
    pub const fn wifi() -> Self {
        Self::new(Connectivity::Wifi)
    }

    #[must_use]
    pub const fn new(connectivity: Connectivity) -> Self {
        Self {
            connectivity,
            power_saving: false,
            free_disk_bytes: None,
        }
    }

    #[must_use]
    pub const fn with_power_saving(mut self, power_saving: bool) -> Self {
        self.power_saving = power_saving;
        self
    }

    #[must_use]
    pub const fn with_free_disk_bytes(mut self, bytes: u64) -> Self {
        self.free_disk_bytes = Some(bytes);
        self
    }
}

impl Default for StaticDeviceProbe {
    fn default() -> Self {
        Self::wifi()
    }
}

impl DeviceProbe for StaticDeviceProbe {
    fn connectivity(&self) -> BoxFuture<'_, Connectivity> {
        let connectivity = self.connectivity;
        Box::pin(async move { connectivity })
    }

    fn is_power_saving(&self) -> bool {
        self.power_saving
    }

    fn free_disk_bytes(&self, _path: &Path) -> Option<u64> {
        self.free_disk_bytes
    }
}
