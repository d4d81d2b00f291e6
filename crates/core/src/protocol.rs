//! Packet exchange engine.
//!
//! An exchange writes the output buffer and fills the input buffer in
//! `pack_size` chunks over one locked session. The device speaks half-duplex
//! command/response, so a read is issued right after the last output packet
//! that the pending input depends on:
//!
//! ```text
//! while out_rem >= pack || in_rem >= pack:
//!     if out_rem >= pack: write next output packet
//!     else:               write idle (HID only)
//!     if (in_rem == pack && out_rem < pack) || in_rem > pack:
//!         read next input packet
//! ```
//!
//! Payload content is never interpreted here.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::DeviceSession;
use crate::transport::{Attach, PacketTransport, TransportKind};
use tracing::{debug, trace, warn};

/// Validated shape of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub pack_size: usize,
    pub out_len: usize,
    pub in_len: usize,
}

impl ExchangeRequest {
    /// Check that both lengths are whole multiples of a positive `pack_size`.
    pub fn new(pack_size: usize, out_len: usize, in_len: usize) -> Result<Self> {
        if pack_size == 0 {
            return Err(Error::ProtocolLengthInvalid {
                field: "pack_size",
                value: 0,
                pack_size,
            });
        }
        for (field, value) in [("out_len", out_len), ("in_len", in_len)] {
            if value % pack_size != 0 {
                return Err(Error::ProtocolLengthInvalid {
                    field,
                    value,
                    pack_size,
                });
            }
        }
        Ok(Self {
            pack_size,
            out_len,
            in_len,
        })
    }

    /// Check the pack size against what `kind` can carry in one packet.
    pub fn check_transport(&self, kind: TransportKind) -> Result<()> {
        if self.pack_size > kind.max_pack_size() || self.pack_size % kind.block_len() != 0 {
            return Err(Error::ProtocolLengthInvalid {
                field: "pack_size",
                value: self.pack_size,
                pack_size: kind.block_len(),
            });
        }
        Ok(())
    }
}

/// Drive the chunked write/read loop over an attached transport.
///
/// `out` and `input` must already be validated against `pack_size`. Succeeds
/// only if every output byte was written and every input byte read.
pub fn run_exchange(
    transport: &mut dyn PacketTransport,
    pack_size: usize,
    out: &[u8],
    input: &mut [u8],
) -> Result<()> {
    let mut out_rem = out.len();
    let mut in_rem = input.len();
    let mut out_pos = 0;
    let mut in_pos = 0;
    let mut failure = None;

    while pack_size > 0 && (out_rem >= pack_size || in_rem >= pack_size) {
        let sent = if out_rem >= pack_size {
            transport
                .write_packet(&out[out_pos..out_pos + pack_size])
                .map(|()| {
                    out_rem -= pack_size;
                    out_pos += pack_size;
                })
        } else {
            transport.write_idle()
        };
        if let Err(e) = sent {
            failure = Some(e);
            break;
        }

        if (in_rem == pack_size && out_rem < pack_size) || in_rem > pack_size {
            if let Err(e) = transport.read_packet(&mut input[in_pos..in_pos + pack_size]) {
                failure = Some(e);
                break;
            }
            in_rem -= pack_size;
            in_pos += pack_size;
        }
        trace!(out_rem, in_rem, "Exchange step");
    }

    match failure {
        Some(e) => Err(e),
        None if out_rem == 0 && in_rem == 0 => Ok(()),
        None => Err(Error::TransferShort {
            expected: out.len() + input.len(),
            actual: out_pos + in_pos,
        }),
    }
}

/// Run a full exchange on `path` with the transport produced by `attach`.
///
/// The session is always closed and the transport always released; either
/// failing turns an otherwise successful exchange into a failure.
pub fn exchange_with(
    config: &Config,
    path: &str,
    attach: &dyn Attach,
    pack_size: usize,
    out: &[u8],
    input: &mut [u8],
) -> Result<()> {
    let request = ExchangeRequest::new(pack_size, out.len(), input.len())?;
    request.check_transport(attach.kind())?;

    let session = DeviceSession::open(config, path)?;
    debug!(
        device = path,
        kind = ?attach.kind(),
        pack_size,
        out_len = out.len(),
        in_len = input.len(),
        "Exchange started"
    );

    let result = match attach.attach(&session) {
        Ok(mut transport) => {
            let exchanged = run_exchange(transport.as_mut(), pack_size, out, input);
            let released = transport.release();
            if let Err(e) = &released {
                warn!(device = path, error = %e, "Transport release failed");
            }
            exchanged.and(released)
        }
        Err(e) => Err(e),
    };

    let closed = session.close();
    match &result {
        Ok(()) => debug!(device = path, "Exchange complete"),
        Err(e) => debug!(device = path, error = %e, "Exchange failed"),
    }
    result.and(closed)
}

/// Exchange packets with the dongle at `path`, picking the transport from `product_id`.
pub fn exchange(
    config: &Config,
    path: &str,
    product_id: u32,
    pack_size: usize,
    out: &[u8],
    input: &mut [u8],
) -> Result<()> {
    let kind = TransportKind::for_product(product_id);
    exchange_with(config, path, &kind, pack_size, out, input)
}
