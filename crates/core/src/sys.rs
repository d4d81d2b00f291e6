//! Kernel ABI for usbfs and hiddev: `#[repr(C)]` structures and ioctl wrappers.
//!
//! Layouts mirror `<linux/usbdevice_fs.h>` and `<linux/hiddev.h>`. All `unsafe`
//! is confined to this module; callers get safe functions over borrowed fds.

use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};
use std::os::fd::{AsRawFd, BorrowedFd};

pub const HID_MAX_MULTI_USAGES: usize = 1024;
pub const HID_REPORT_TYPE_INPUT: u32 = 1;
pub const HID_REPORT_TYPE_OUTPUT: u32 = 2;
pub const HIDDEV_FLAG_UREF: libc::c_int = 0x1;
pub const HIDDEV_FLAG_REPORT: libc::c_int = 0x2;

#[repr(C)]
pub struct UsbdevfsBulkTransfer {
    ep: libc::c_uint,
    len: libc::c_uint,
    timeout: libc::c_uint,
    data: *mut libc::c_void,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HiddevDevinfo {
    pub bustype: u32,
    pub busnum: u32,
    pub devnum: u32,
    pub ifnum: u32,
    pub vendor: i16,
    pub product: i16,
    pub version: i16,
    pub num_applications: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddevReportInfo {
    pub report_type: u32,
    pub report_id: u32,
    pub num_fields: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddevUsageRef {
    pub report_type: u32,
    pub report_id: u32,
    pub field_index: u32,
    pub usage_index: u32,
    pub usage_code: u32,
    pub value: i32,
}

#[repr(C)]
pub struct HiddevUsageRefMulti {
    pub uref: HiddevUsageRef,
    pub num_values: u32,
    pub values: [i32; HID_MAX_MULTI_USAGES],
}

impl Default for HiddevUsageRefMulti {
    fn default() -> Self {
        Self {
            uref: HiddevUsageRef::default(),
            num_values: 0,
            values: [0; HID_MAX_MULTI_USAGES],
        }
    }
}

/// Size of one event record read from a hiddev node in `HIDDEV_FLAG_UREF` mode.
pub const USAGE_REF_LEN: usize = std::mem::size_of::<HiddevUsageRef>();

ioctl_readwrite!(usbdevfs_bulk, b'U', 2, UsbdevfsBulkTransfer);
ioctl_read!(usbdevfs_claim_interface, b'U', 15, libc::c_uint);
ioctl_read!(usbdevfs_release_interface, b'U', 16, libc::c_uint);

ioctl_read!(hidioc_g_devinfo, b'H', 0x03, HiddevDevinfo);
ioctl_write_ptr!(hidioc_g_report, b'H', 0x07, HiddevReportInfo);
ioctl_write_ptr!(hidioc_s_report, b'H', 0x08, HiddevReportInfo);
ioctl_write_ptr!(hidioc_s_flag, b'H', 0x0F, libc::c_int);
ioctl_readwrite!(hidioc_g_usages, b'H', 0x13, HiddevUsageRefMulti);
ioctl_write_ptr!(hidioc_s_usages, b'H', 0x14, HiddevUsageRefMulti);

fn bulk(
    fd: BorrowedFd<'_>,
    ep: u32,
    data: *mut u8,
    len: usize,
    timeout_ms: u32,
) -> nix::Result<usize> {
    let mut transfer = UsbdevfsBulkTransfer {
        ep,
        len: len as libc::c_uint,
        timeout: timeout_ms,
        data: data.cast(),
    };
    // SAFETY: `data` points at `len` bytes that outlive the call.
    let moved = unsafe { usbdevfs_bulk(fd.as_raw_fd(), &mut transfer) }?;
    Ok(moved as usize)
}

/// Bulk OUT transfer; returns the number of bytes the device accepted.
pub fn bulk_out(
    fd: BorrowedFd<'_>,
    ep: u32,
    data: &[u8],
    timeout_ms: u32,
) -> nix::Result<usize> {
    // The kernel only reads from the buffer on an OUT endpoint.
    bulk(fd, ep, data.as_ptr().cast_mut(), data.len(), timeout_ms)
}

/// Bulk IN transfer; returns the number of bytes received.
pub fn bulk_in(
    fd: BorrowedFd<'_>,
    ep: u32,
    data: &mut [u8],
    timeout_ms: u32,
) -> nix::Result<usize> {
    bulk(fd, ep, data.as_mut_ptr(), data.len(), timeout_ms)
}

pub fn claim_interface(fd: BorrowedFd<'_>, interface: u32) -> nix::Result<()> {
    let mut interface = interface;
    // SAFETY: the kernel reads one unsigned int from a valid pointer.
    unsafe { usbdevfs_claim_interface(fd.as_raw_fd(), &mut interface) }.map(drop)
}

pub fn release_interface(fd: BorrowedFd<'_>, interface: u32) -> nix::Result<()> {
    let mut interface = interface;
    // SAFETY: see `claim_interface`.
    unsafe { usbdevfs_release_interface(fd.as_raw_fd(), &mut interface) }.map(drop)
}

pub fn hid_devinfo(fd: BorrowedFd<'_>) -> nix::Result<HiddevDevinfo> {
    let mut info = HiddevDevinfo::default();
    // SAFETY: `info` is a properly sized, writable hiddev_devinfo.
    unsafe { hidioc_g_devinfo(fd.as_raw_fd(), &mut info) }?;
    Ok(info)
}

pub fn hid_set_flags(fd: BorrowedFd<'_>, flags: libc::c_int) -> nix::Result<()> {
    // SAFETY: the kernel reads one int from a valid pointer.
    unsafe { hidioc_s_flag(fd.as_raw_fd(), &flags) }.map(drop)
}

pub fn hid_commit_report(fd: BorrowedFd<'_>, report_type: u32) -> nix::Result<()> {
    let info = HiddevReportInfo {
        report_type,
        ..Default::default()
    };
    // SAFETY: `info` is a valid hiddev_report_info.
    unsafe { hidioc_s_report(fd.as_raw_fd(), &info) }.map(drop)
}

pub fn hid_fetch_report(fd: BorrowedFd<'_>, report_type: u32) -> nix::Result<()> {
    let info = HiddevReportInfo {
        report_type,
        ..Default::default()
    };
    // SAFETY: `info` is a valid hiddev_report_info.
    unsafe { hidioc_g_report(fd.as_raw_fd(), &info) }.map(drop)
}

pub fn hid_set_usages(fd: BorrowedFd<'_>, usages: &HiddevUsageRefMulti) -> nix::Result<()> {
    // SAFETY: `usages` is a fully initialized hiddev_usage_ref_multi.
    unsafe { hidioc_s_usages(fd.as_raw_fd(), usages) }.map(drop)
}

pub fn hid_get_usages(fd: BorrowedFd<'_>, usages: &mut HiddevUsageRefMulti) -> nix::Result<()> {
    // SAFETY: `usages` is a writable hiddev_usage_ref_multi.
    unsafe { hidioc_g_usages(fd.as_raw_fd(), usages) }.map(drop)
}
