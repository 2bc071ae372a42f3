//! Transport adapter consumed by the protocol engines
//!
//! The engines drive a half-duplex serial link through the narrow
//! [`RtuTransport`] interface supplied by the embedder. All calls are
//! non-blocking: `read` returns whatever the UART/DMA path has buffered
//! (possibly nothing) and `write` returns how many bytes the outbound path
//! accepted. The engines never assume `write` blocks until the bytes are
//! physically on the wire.
//!
//! # Direction control
//!
//! RS-485 transceivers share one pair for both directions, so the engines
//! announce every direction change through [`RtuTransport::dir_ctrl`]:
//! `TxOnly` immediately before emitting a frame, `RxOnly` after a completed
//! exchange. The physical pin must stay asserted until the final bit has
//! left the shift register; scheduling that toggle (for example with a
//! one-shot from [`crate::scheduler::TickScheduler::defer`]) is the
//! embedder's responsibility.

use crate::error::ModbusResult;

/// Bus direction requested from a half-duplex transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Receive path enabled, driver released
    RxOnly,
    /// Driver enabled for transmission
    TxOnly,
}

/// Serial transport interface implemented by the embedder
pub trait RtuTransport {
    /// Prepare the underlying UART/DMA/GPIO resources
    fn init(&mut self) -> ModbusResult<()>;

    /// Non-blocking read of buffered inbound bytes; returns the count
    /// copied into `dst`, possibly zero
    fn read(&mut self, dst: &mut [u8]) -> usize;

    /// Non-blocking enqueue to the outbound path; returns the count
    /// accepted from `src`
    fn write(&mut self, src: &[u8]) -> usize;

    /// Request a switch between receive-only and transmit-only
    ///
    /// Full-duplex transports can keep the default no-op.
    fn dir_ctrl(&mut self, _dir: Direction) {}
}

/// Counters exposed by both engines via `stats()`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    /// Bytes handed to `write`
    pub bytes_sent: u64,
    /// Bytes drained from `read`
    pub bytes_received: u64,
    /// Frames transmitted (including retransmissions)
    pub requests_sent: u64,
    /// Frames accepted by the parser
    pub responses_received: u64,
    /// Requests that exhausted their final timeout
    pub timeouts: u64,
    /// Frames rejected on a CRC mismatch
    pub crc_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl RtuTransport for NullTransport {
        fn init(&mut self) -> ModbusResult<()> {
            Ok(())
        }

        fn read(&mut self, _dst: &mut [u8]) -> usize {
            0
        }

        fn write(&mut self, src: &[u8]) -> usize {
            src.len()
        }
    }

    #[test]
    fn test_dir_ctrl_default_is_noop() {
        let mut t = NullTransport;
        t.dir_ctrl(Direction::TxOnly);
        t.dir_ctrl(Direction::RxOnly);
        assert_eq!(t.read(&mut [0u8; 4]), 0);
    }
}
