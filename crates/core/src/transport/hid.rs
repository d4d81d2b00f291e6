//! hiddev report transport.
//!
//! Data moves in 64-byte report blocks through the usage ioctls:
//!
//! - Write block: `HIDIOCSUSAGES` on the output usage, then `HIDIOCSREPORT`.
//!   A block of zeros is the idle report that keeps the dongle primed.
//! - Read block: idle report first (except for the first block), wait up to
//!   3 s for the node to become readable, drain one usage event, then
//!   `HIDIOCGREPORT` and `HIDIOCGUSAGES` on the input usage.

use super::PacketTransport;
use crate::error::{Error, Result};
use crate::sys::{self, HiddevUsageRefMulti};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::fs::File;
use std::io::Read;
use std::os::fd::AsFd;
use tracing::trace;

/// Bytes per HID report block.
pub const HID_REPORT_LEN: usize = 64;
/// How long a read waits for the device to signal input.
pub const HID_READ_TIMEOUT_MS: u16 = 3000;

const USAGE_CODE_OUTPUT: u32 = 0xFFA0_0004;
const USAGE_CODE_INPUT: u32 = 0xFFA0_0003;

/// The hiddev calls the report framing is built from.
///
/// Implemented by the device [`File`]; tests substitute a recording fake.
pub(crate) trait HidNode {
    fn set_usages(&self, usages: &HiddevUsageRefMulti) -> Result<()>;
    fn commit_report(&self, report_type: u32) -> Result<()>;
    /// Wait up to `timeout_ms` for an input report to be signalled.
    fn wait_readable(&self, timeout_ms: u16) -> Result<()>;
    fn read_event(&self, event: &mut [u8]) -> Result<usize>;
    fn fetch_report(&self, report_type: u32) -> Result<()>;
    fn get_usages(&self, usages: &mut HiddevUsageRefMulti) -> Result<()>;
}

impl HidNode for File {
    fn set_usages(&self, usages: &HiddevUsageRefMulti) -> Result<()> {
        sys::hid_set_usages(self.as_fd(), usages).map_err(|errno| Error::Io(errno.into()))
    }

    fn commit_report(&self, report_type: u32) -> Result<()> {
        sys::hid_commit_report(self.as_fd(), report_type).map_err(|errno| Error::Io(errno.into()))
    }

    fn wait_readable(&self, timeout_ms: u16) -> Result<()> {
        let mut fds = [PollFd::new(
            self.as_fd(),
            PollFlags::POLLIN | PollFlags::POLLPRI,
        )];
        let ready = poll(&mut fds, PollTimeout::from(timeout_ms))
            .map_err(|errno| Error::Io(errno.into()))?;
        if ready == 0 {
            return Err(Error::TransferTimeout(format!(
                "no HID input report within {timeout_ms} ms"
            )));
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        let exceptional =
            PollFlags::POLLPRI | PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL;
        if !revents.contains(PollFlags::POLLIN) || revents.intersects(exceptional) {
            return Err(Error::TransferTimeout(format!(
                "HID node signalled {revents:?} instead of input"
            )));
        }
        Ok(())
    }

    fn read_event(&self, event: &mut [u8]) -> Result<usize> {
        Ok((&*self).read(event)?)
    }

    fn fetch_report(&self, report_type: u32) -> Result<()> {
        sys::hid_fetch_report(self.as_fd(), report_type).map_err(|errno| Error::Io(errno.into()))
    }

    fn get_usages(&self, usages: &mut HiddevUsageRefMulti) -> Result<()> {
        sys::hid_get_usages(self.as_fd(), usages).map_err(|errno| Error::Io(errno.into()))
    }
}

/// hiddev transport borrowing the session's device handle.
pub struct HidTransport<'s, N: ?Sized = File> {
    node: &'s N,
    usages: Box<HiddevUsageRefMulti>,
}

impl<'s> HidTransport<'s> {
    /// Switch the node to usage-reference events with report delivery.
    pub fn attach(device: &'s File) -> Result<Self> {
        sys::hid_set_flags(device.as_fd(), sys::HIDDEV_FLAG_UREF | sys::HIDDEV_FLAG_REPORT)
            .map_err(|errno| Error::InterfaceClaimFailed(errno.into()))?;
        Ok(Self::over(device))
    }
}

#[allow(private_bounds)]
impl<'s, N: HidNode + ?Sized> HidTransport<'s, N> {
    pub(crate) fn over(node: &'s N) -> Self {
        Self {
            node,
            usages: Box::default(),
        }
    }

    fn prepare_usages(&mut self, report_type: u32, usage_code: u32) {
        let usages = &mut *self.usages;
        usages.uref = sys::HiddevUsageRef {
            report_type,
            usage_code,
            ..Default::default()
        };
        usages.num_values = HID_REPORT_LEN as u32;
    }

    /// Send one report block; `None` sends the all-zero idle report.
    fn write_block(&mut self, block: Option<&[u8]>) -> Result<()> {
        self.prepare_usages(sys::HID_REPORT_TYPE_OUTPUT, USAGE_CODE_OUTPUT);
        let values = &mut self.usages.values[..HID_REPORT_LEN];
        match block {
            Some(block) => {
                for (value, byte) in values.iter_mut().zip(block) {
                    *value = i32::from(*byte);
                }
            }
            None => values.fill(0),
        }

        self.node.set_usages(&self.usages)?;
        self.node.commit_report(sys::HID_REPORT_TYPE_OUTPUT)
    }

    /// Consume the usage event that announced the input report.
    fn drain_event(&self) -> Result<()> {
        let mut event = [0u8; sys::USAGE_REF_LEN];
        let actual = self.node.read_event(&mut event)?;
        if actual != event.len() {
            return Err(Error::TransferShort {
                expected: event.len(),
                actual,
            });
        }
        Ok(())
    }

    fn read_block(&mut self, block: &mut [u8]) -> Result<()> {
        self.node.wait_readable(HID_READ_TIMEOUT_MS)?;
        self.drain_event()?;

        self.node.fetch_report(sys::HID_REPORT_TYPE_INPUT)?;
        self.prepare_usages(sys::HID_REPORT_TYPE_INPUT, USAGE_CODE_INPUT);
        self.node.get_usages(&mut self.usages)?;

        for (byte, value) in block.iter_mut().zip(&self.usages.values[..HID_REPORT_LEN]) {
            *byte = *value as u8;
        }
        Ok(())
    }
}

/// HID transfers must be a positive whole number of report blocks.
pub(crate) fn check_blocks(len: usize) -> Result<()> {
    if len == 0 || len % HID_REPORT_LEN != 0 {
        return Err(Error::ProtocolLengthInvalid {
            field: "hid_len",
            value: len,
            pack_size: HID_REPORT_LEN,
        });
    }
    Ok(())
}

#[allow(private_bounds)]
impl<N: HidNode + ?Sized> PacketTransport for HidTransport<'_, N> {
    fn write_packet(&mut self, data: &[u8]) -> Result<()> {
        check_blocks(data.len())?;
        trace!(
            blocks = data.len() / HID_REPORT_LEN,
            data_hex = format_args!("{:02X?}", data),
            "HID TX"
        );
        for block in data.chunks_exact(HID_REPORT_LEN) {
            self.write_block(Some(block))?;
        }
        Ok(())
    }

    fn read_packet(&mut self, buf: &mut [u8]) -> Result<()> {
        check_blocks(buf.len())?;
        for (n, block) in buf.chunks_exact_mut(HID_REPORT_LEN).enumerate() {
            if n > 0 {
                self.write_block(None)?;
            }
            self.read_block(block)?;
        }
        trace!(
            blocks = buf.len() / HID_REPORT_LEN,
            data_hex = format_args!("{:02X?}", buf),
            "HID RX"
        );
        Ok(())
    }

    fn write_idle(&mut self) -> Result<()> {
        trace!("HID idle report");
        self.write_block(None)
    }
}
