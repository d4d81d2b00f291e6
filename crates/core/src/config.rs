//! Runtime configuration: lock directory, usbfs root candidates, and HID node naming.
//!
//! Everything here is resolved from the environment on each call; nothing is cached.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Environment variable overriding the lock file directory.
pub const LOCK_DIR_ENV: &str = "GRD_IPC_NAME";
/// Environment variable overriding the usbfs root.
pub const USBFS_PATH_ENV: &str = "USB_DEVFS_PATH";

/// Default lock file directory.
pub const DEFAULT_LOCK_DIR: &str = "/tmp";
/// usbfs roots tried, in order, when no override exists.
pub const USBFS_FALLBACKS: [&str; 2] = ["/dev/bus/usb", "/proc/bus/usb"];
/// Prefix of the Guardant hiddev nodes (`/dev/grdhid0` .. `/dev/grdhid15`).
pub const HID_PATH_PREFIX: &str = "/dev/grdhid";
/// Number of hiddev nodes probed during enumeration.
pub const HID_NODE_COUNT: usize = 16;

/// Resolved configuration for one call into the access layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the `grdNN.lock` files. Kept as given, without normalization.
    pub lock_dir: PathBuf,
    /// usbfs root from the environment, used when it exists.
    pub usbfs_override: Option<PathBuf>,
    /// usbfs roots tried after the override.
    pub usbfs_fallbacks: Vec<PathBuf>,
    /// Path prefix identifying hiddev nodes.
    pub hid_prefix: String,
    /// How many `<hid_prefix><n>` nodes enumeration looks at.
    pub hid_node_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            usbfs_override: None,
            usbfs_fallbacks: USBFS_FALLBACKS.iter().map(PathBuf::from).collect(),
            hid_prefix: HID_PATH_PREFIX.to_string(),
            hid_node_count: HID_NODE_COUNT,
        }
    }
}

impl Config {
    /// Build a configuration from `GRD_IPC_NAME` and `USB_DEVFS_PATH`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = env::var_os(LOCK_DIR_ENV) {
            config.lock_dir = PathBuf::from(dir);
        }
        config.usbfs_override = env::var_os(USBFS_PATH_ENV).map(PathBuf::from);
        config
    }

    /// usbfs root candidates in lookup order.
    pub fn usbfs_candidates(&self) -> impl Iterator<Item = &PathBuf> {
        self.usbfs_override.iter().chain(self.usbfs_fallbacks.iter())
    }

    /// Whether `path` names one of the hiddev nodes.
    pub fn is_hid_path(&self, path: &str) -> bool {
        path.starts_with(&self.hid_prefix)
    }

    /// Path of the `index`-th hiddev node.
    pub fn hid_node(&self, index: usize) -> PathBuf {
        PathBuf::from(format!("{}{}", self.hid_prefix, index))
    }
}
