//! Device probing: decide whether a node is a supported dongle and which variant.
//!
//! hiddev nodes report vendor/product through `HIDIOCGDEVINFO`. usbfs nodes
//! start with the USB device descriptor, whose bytes 8..12 hold `idVendor`
//! and `idProduct` little-endian; a Guardant dongle reads `89 0A <pid> 00`.

use crate::config::Config;
use crate::device::ProductId;
use crate::error::{Error, Result};
use crate::session::DeviceSession;
use crate::{sys, GRD_VENDOR};
use std::io::Read;
use tracing::{debug, info};

/// Bytes of the descriptor stream inspected on usbfs nodes.
pub const DESCRIPTOR_PROBE_LEN: usize = 16;

/// Offset of `idVendor` in the USB device descriptor.
const ID_OFFSET: usize = 8;

/// Identify a raw dongle from the start of its usbfs descriptor stream.
///
/// Candidates are tried in [`ProductId::RAW`] order; the first match wins.
pub fn identify_descriptor(descriptor: &[u8]) -> Result<ProductId> {
    let ids = descriptor.get(ID_OFFSET..ID_OFFSET + 4).ok_or_else(|| {
        Error::UnsupportedDevice(format!("descriptor too short: {} bytes", descriptor.len()))
    })?;

    let [vendor_lo, vendor_hi] = GRD_VENDOR.to_le_bytes();
    ProductId::RAW
        .into_iter()
        .find(|product| ids == [vendor_lo, vendor_hi, product.pid() as u8, 0x00])
        .ok_or_else(|| Error::UnsupportedDevice(format!("descriptor ids {ids:02X?}")))
}

/// Identify a HID dongle from the vendor/product pair hiddev reports.
pub fn identify_hid(vendor: u16, product: u16) -> Result<ProductId> {
    if vendor != GRD_VENDOR {
        return Err(Error::UnsupportedDevice(format!("HID vendor 0x{vendor:04X}")));
    }
    ProductId::HID
        .into_iter()
        .find(|p| p.pid() == u32::from(product))
        .ok_or_else(|| Error::UnsupportedDevice(format!("HID product 0x{product:04X}")))
}

fn probe_session(config: &Config, session: &DeviceSession) -> Result<ProductId> {
    if config.is_hid_path(session.path()) {
        let info = sys::hid_devinfo(session.fd()).map_err(|errno| Error::Io(errno.into()))?;
        identify_hid(info.vendor as u16, info.product as u16)
    } else {
        let mut descriptor = [0u8; DESCRIPTOR_PROBE_LEN];
        let actual = session.device().read(&mut descriptor)?;
        if actual != descriptor.len() {
            return Err(Error::TransferShort {
                expected: descriptor.len(),
                actual,
            });
        }
        identify_descriptor(&descriptor)
    }
}

/// Open `path` under its lock and identify the dongle behind it.
///
/// The session is closed whatever the outcome; a failing close fails the probe.
pub fn probe(config: &Config, path: &str) -> Result<ProductId> {
    let session = DeviceSession::open(config, path)?;
    let identified = probe_session(config, &session);
    let closed = session.close();

    match &identified {
        Ok(product) => info!(device = path, product = %product, "Found Guardant dongle"),
        Err(e) => debug!(device = path, error = %e, "Not a supported dongle"),
    }
    let product = identified?;
    closed?;
    Ok(product)
}
