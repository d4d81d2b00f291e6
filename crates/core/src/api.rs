//! Boundary operations for the foreign-ABI adapter.
//!
//! Each call resolves [`Config::from_env`] afresh and collapses every error
//! into the pass/fail signal the adapter forwards; details go to the log.

use crate::config::Config;
use crate::{enumerate, probe, protocol, DRIVER_VERSION};
use std::path::Path;
use tracing::{debug, trace};

/// Version reported to the adapter.
pub fn driver_version() -> u32 {
    trace!(version = format_args!("0x{:X}", DRIVER_VERSION), "driver_version");
    DRIVER_VERSION
}

/// Probe `path`; returns the product ID of a supported dongle.
pub fn probe_device(path: &str) -> Option<u32> {
    trace!(path, "probe_device");
    let config = Config::from_env();
    match probe::probe(&config, path) {
        Ok(product) => {
            trace!(path, pid = product.pid(), "probe_device ok");
            Some(product.pid())
        }
        Err(e) => {
            debug!(path, error = %e, "probe_device failed");
            None
        }
    }
}

/// Write `out` and fill `input` in `pack_size` packets; true only if both complete.
pub fn exchange_packets(
    path: &str,
    product_id: u32,
    pack_size: usize,
    out: &[u8],
    input: &mut [u8],
) -> bool {
    trace!(
        path,
        product_id,
        pack_size,
        out_len = out.len(),
        in_len = input.len(),
        "exchange_packets"
    );
    let config = Config::from_env();
    match protocol::exchange(&config, path, product_id, pack_size, out, input) {
        Ok(()) => true,
        Err(e) => {
            debug!(path, error = %e, "exchange_packets failed");
            false
        }
    }
}

/// Number of candidate device paths accepted by `predicate`; zero on failure.
pub fn enumerate_devices<F>(predicate: F) -> usize
where
    F: FnMut(&Path) -> bool,
{
    trace!("enumerate_devices");
    let config = Config::from_env();
    match enumerate::enumerate(&config, predicate) {
        Ok(count) => {
            trace!(count, "enumerate_devices ok");
            count
        }
        Err(e) => {
            debug!(error = %e, "enumerate_devices failed");
            0
        }
    }
}
