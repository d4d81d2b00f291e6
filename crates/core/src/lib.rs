//! guardant-core: Linux access layer for Guardant USB dongles.
//!
//! This crate discovers dongles on usbfs and hiddev nodes, serializes access to
//! each device across processes with advisory lock files, and moves opaque
//! command/response packets over raw bulk endpoints or HID reports.

pub mod api;
pub mod config;
pub mod device;
pub mod enumerate;
pub mod error;
#[cfg(test)]
mod integration_tests;
pub mod lock;
pub mod probe;
pub mod protocol;
pub mod session;
mod sys;
pub mod transport;

/// Guardant USB Vendor ID.
pub const GRD_VENDOR: u16 = 0x0A89;

/// Version reported to the foreign-ABI adapter.
pub const DRIVER_VERSION: u32 = 0x0540;

/// Known Guardant product IDs.
pub mod pids {
    /// Guardant Sign/Time USB.
    pub const SIGN_TIME: u32 = 0x08;
    /// Guardant Sign/Time USB HID.
    pub const SIGN_TIME_HID: u32 = 0x0C;
    /// Guardant Sign/Time USB (WinUSB).
    pub const SIGN_TIME_WINUSB: u32 = 0xC2;
    /// Guardant Code USB.
    pub const CODE: u32 = 0x09;
    /// Guardant Code USB HID.
    pub const CODE_HID: u32 = 0x0D;
    /// Guardant Code USB (WinUSB).
    pub const CODE_WINUSB: u32 = 0xC3;
}

pub use config::Config;
pub use device::ProductId;
pub use error::{Error, Result};
