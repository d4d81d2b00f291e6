//! Packet transport abstraction for dongle communication.
//!
//! Provides a trait-based transport layer so that raw usbfs bulk endpoints,
//! hiddev report framing and mock devices share the same interface. Which
//! transport a session uses is a pure function of the product ID.

pub mod bulk;
pub mod hid;

use crate::device::ProductId;
use crate::error::Result;
use crate::session::DeviceSession;
use tracing::debug;

pub use bulk::BulkTransport;
pub use hid::HidTransport;

/// Largest pack size a single usbfs bulk request may carry.
pub const MAX_PACK_SIZE: usize = 16384;

/// Fixed-size packet I/O over an open device.
///
/// Every call moves the whole buffer or fails; partial transfers are errors.
pub trait PacketTransport {
    /// Send one packet.
    fn write_packet(&mut self, data: &[u8]) -> Result<()>;

    /// Receive exactly `buf.len()` bytes.
    fn read_packet(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Keep the device primed while only input is pending. No-op unless the
    /// transport needs explicit idle reports.
    fn write_idle(&mut self) -> Result<()> {
        Ok(())
    }

    /// Undo whatever attaching the transport claimed on the device.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The two ways of talking to a dongle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Raw usbfs bulk endpoints.
    Bulk,
    /// hiddev usage/report ioctls in 64-byte blocks.
    Hid,
}

impl TransportKind {
    /// Select the transport for a product ID. Only the HID variants use hiddev;
    /// every other ID, known or not, goes over bulk endpoints.
    pub fn for_product(pid: u32) -> Self {
        match ProductId::from_pid(pid) {
            Some(product) if product.is_hid() => Self::Hid,
            _ => Self::Bulk,
        }
    }

    /// Granularity a pack size must be a multiple of.
    pub fn block_len(&self) -> usize {
        match self {
            Self::Bulk => 1,
            Self::Hid => hid::HID_REPORT_LEN,
        }
    }

    /// Largest pack size this transport accepts.
    pub fn max_pack_size(&self) -> usize {
        MAX_PACK_SIZE
    }
}

/// Builds a transport on top of an open session.
pub trait Attach {
    /// Which transport will be attached; used to validate pack sizes up front.
    fn kind(&self) -> TransportKind;

    /// Claim the device for packet I/O.
    fn attach<'s>(&self, session: &'s DeviceSession) -> Result<Box<dyn PacketTransport + 's>>;
}

impl Attach for TransportKind {
    fn kind(&self) -> TransportKind {
        *self
    }

    fn attach<'s>(&self, session: &'s DeviceSession) -> Result<Box<dyn PacketTransport + 's>> {
        debug!(device = session.path(), kind = ?self, "Attaching transport");
        match self {
            Self::Bulk => Ok(Box::new(BulkTransport::claim(session.fd())?)),
            Self::Hid => Ok(Box::new(HidTransport::attach(session.device())?)),
        }
    }
}
