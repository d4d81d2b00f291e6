//! Device model: Guardant product variants and the transport each one speaks.

use crate::pids;
use serde::{Deserialize, Serialize};

/// Supported Guardant dongle variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductId {
    SignTime,
    SignTimeHid,
    SignTimeWinUsb,
    Code,
    CodeHid,
    CodeWinUsb,
}

impl ProductId {
    /// Variants recognized on raw usbfs nodes, in probe order.
    pub const RAW: [ProductId; 4] = [
        ProductId::SignTime,
        ProductId::SignTimeWinUsb,
        ProductId::Code,
        ProductId::CodeWinUsb,
    ];

    /// Variants recognized on hiddev nodes.
    pub const HID: [ProductId; 2] = [ProductId::SignTimeHid, ProductId::CodeHid];

    /// Look up a variant from its USB product ID.
    pub fn from_pid(pid: u32) -> Option<Self> {
        match pid {
            pids::SIGN_TIME => Some(Self::SignTime),
            pids::SIGN_TIME_HID => Some(Self::SignTimeHid),
            pids::SIGN_TIME_WINUSB => Some(Self::SignTimeWinUsb),
            pids::CODE => Some(Self::Code),
            pids::CODE_HID => Some(Self::CodeHid),
            pids::CODE_WINUSB => Some(Self::CodeWinUsb),
            _ => None,
        }
    }

    /// USB product ID.
    pub fn pid(&self) -> u32 {
        match self {
            Self::SignTime => pids::SIGN_TIME,
            Self::SignTimeHid => pids::SIGN_TIME_HID,
            Self::SignTimeWinUsb => pids::SIGN_TIME_WINUSB,
            Self::Code => pids::CODE,
            Self::CodeHid => pids::CODE_HID,
            Self::CodeWinUsb => pids::CODE_WINUSB,
        }
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignTime => "Guardant Sign/Time USB",
            Self::SignTimeHid => "Guardant Sign/Time USB HID",
            Self::SignTimeWinUsb => "Guardant Sign/Time USB (WinUSB)",
            Self::Code => "Guardant Code USB",
            Self::CodeHid => "Guardant Code USB HID",
            Self::CodeWinUsb => "Guardant Code USB (WinUSB)",
        }
    }

    /// Whether this variant is driven through hiddev report framing.
    pub fn is_hid(&self) -> bool {
        matches!(self, Self::SignTimeHid | Self::CodeHid)
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.pid())
    }
}
