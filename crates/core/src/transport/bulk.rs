//! Raw usbfs bulk transport.
//!
//! One `USBDEVFS_BULK` request per packet on a fixed endpoint pair. The
//! dongle's interface 0 is claimed for the lifetime of the transport.

use super::{PacketTransport, MAX_PACK_SIZE};
use crate::error::{Error, Result};
use crate::sys;
use nix::errno::Errno;
use std::os::fd::BorrowedFd;
use tracing::{trace, warn};

/// Interface claimed on the dongle.
pub const BULK_INTERFACE: u32 = 0;
/// Host-to-device endpoint.
pub const BULK_EP_OUT: u32 = 0x01;
/// Device-to-host endpoint.
pub const BULK_EP_IN: u32 = 0x81;
/// Per-transfer timeout.
pub const BULK_TIMEOUT_MS: u32 = 3000;

/// Bulk endpoint transport over a usbfs device node.
pub struct BulkTransport<'s> {
    fd: BorrowedFd<'s>,
    claimed: bool,
}

impl<'s> BulkTransport<'s> {
    /// Claim the dongle interface on `fd`.
    pub fn claim(fd: BorrowedFd<'s>) -> Result<Self> {
        sys::claim_interface(fd, BULK_INTERFACE)
            .map_err(|errno| Error::InterfaceClaimFailed(errno.into()))?;
        trace!(interface = BULK_INTERFACE, "USB interface claimed");
        Ok(Self { fd, claimed: true })
    }
}

/// Map a raw bulk ioctl result onto the transfer error taxonomy.
pub(crate) fn check_transfer(result: nix::Result<usize>, expected: usize, ep: u32) -> Result<()> {
    match result {
        Ok(actual) if actual == expected => Ok(()),
        Ok(actual) => Err(Error::TransferShort { expected, actual }),
        Err(Errno::ETIMEDOUT) => Err(Error::TransferTimeout(format!(
            "bulk endpoint 0x{ep:02X} after {BULK_TIMEOUT_MS} ms"
        ))),
        Err(errno) => Err(Error::Io(errno.into())),
    }
}

fn check_len(len: usize) -> Result<()> {
    if len == 0 || len > MAX_PACK_SIZE {
        return Err(Error::ProtocolLengthInvalid {
            field: "bulk_len",
            value: len,
            pack_size: MAX_PACK_SIZE,
        });
    }
    Ok(())
}

impl PacketTransport for BulkTransport<'_> {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        check_len(data.len())?;
        trace!(
            ep = format_args!("0x{:02X}", BULK_EP_OUT),
            data_hex = format_args!("{:02X?}", data),
            "Bulk TX"
        );
        let result = sys::bulk_out(self.fd, BULK_EP_OUT, data, BULK_TIMEOUT_MS);
        check_transfer(result, data.len(), BULK_EP_OUT)
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<()> {
        check_len(buf.len())?;
        let result = sys::bulk_in(self.fd, BULK_EP_IN, buf, BULK_TIMEOUT_MS);
        check_transfer(result, buf.len(), BULK_EP_IN)?;
        trace!(
            ep = format_args!("0x{:02X}", BULK_EP_IN),
            data_hex = format_args!("{:02X?}", buf),
            "Bulk RX"
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.claimed {
            return Ok(());
        }
        self.claimed = false;
        sys::release_interface(self.fd, BULK_INTERFACE).map_err(|errno| Error::ResourceRelease {
            what: "USB interface",
            source: errno.into(),
        })
    }
}

impl Drop for BulkTransport<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "Releasing USB interface on drop failed");
        }
    }
}
