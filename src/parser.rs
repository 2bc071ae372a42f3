//! Byte-driven RTU frame parser with sliding-window resynchronisation
//!
//! The parser consumes bytes straight out of an RX ring queue, tracking two
//! absolute positions in the ring's monotonic index space: `anchor`, the
//! hypothetical start of the frame under parse, and `forward`, the next
//! unread byte. The invariant `rd <= anchor <= forward <= wr` holds at all
//! times.
//!
//! End-of-frame is detected by state (both CRC bytes consumed), not by
//! inter-frame silence: DMA-batched delivery destroys timing information,
//! so the classic 3.5-character gap cannot be relied on. When a byte does
//! not fit the grammar, or the CRC trailer mismatches, the parser discards
//! exactly one byte (the one at `anchor`), re-anchors, and restarts — a
//! garbage byte in front of a valid frame can therefore never cause that
//! frame to be dropped.

use tracing::trace;

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_READ_DATA_BYTES,
    MAX_WRITE_REGISTERS,
};
use crate::crc::{crc16_from_wire, crc16_update, CRC_INIT};
use crate::ring::RingQueue;

/// Payload capacity of a parsed frame (read responses are the largest)
const MAX_PARSE_DATA: usize = MAX_READ_DATA_BYTES;

/// Receive states of the frame grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Expecting the slave address
    Addr,
    /// Expecting the function code
    Func,
    /// Expecting the exception code of an `function | 0x80` response
    Err,
    /// Expecting the byte-count field
    DataLen,
    /// Collecting payload bytes
    Data,
    /// Collecting the two register-address bytes
    Reg,
    /// Collecting the two register-count bytes
    RegLen,
    /// Collecting the two CRC trailer bytes
    Crc,
}

/// Which side of the link the parser validates frames for
///
/// The master parses responses (byte-count payloads for FC03, echoes for
/// FC16, exception frames); the slave parses requests (register address and
/// count, plus the write payload for FC16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserRole {
    Master,
    Slave,
}

/// A CRC-validated frame emitted by the parser
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    /// Base function code (high bit stripped for exception responses)
    pub function: u8,
    /// Exception code, zero when the frame is not an exception response
    pub err_code: u8,
    /// Register address (slave role, and FC16 response echoes)
    pub reg_addr: u16,
    /// Register count (slave role, and FC16 response echoes)
    pub reg_count: u16,
    data: [u8; MAX_PARSE_DATA],
    data_len: usize,
}

impl ParsedFrame {
    /// Payload bytes: register data of a read response (master role) or of
    /// a write request (slave role); empty otherwise
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }
}

/// Sliding-window frame parser over an RX ring
#[derive(Debug)]
pub struct FrameParser {
    role: ParserRole,
    state: RxState,
    anchor: u32,
    forward: u32,
    cal_crc: u16,
    recv_crc: [u8; 2],
    scratch: u8,
    pdu_in: usize,
    pdu_expected: usize,
    function: u8,
    err_code: u8,
    reg_addr: u16,
    reg_count: u16,
    data: [u8; MAX_PARSE_DATA],
    data_len: usize,
    resyncs: u64,
    crc_errors: u64,
}

impl FrameParser {
    /// Create a parser anchored at ring position zero
    pub fn new(role: ParserRole) -> Self {
        Self {
            role,
            state: RxState::Addr,
            anchor: 0,
            forward: 0,
            cal_crc: CRC_INIT,
            recv_crc: [0; 2],
            scratch: 0,
            pdu_in: 0,
            pdu_expected: 0,
            function: 0,
            err_code: 0,
            reg_addr: 0,
            reg_count: 0,
            data: [0; MAX_PARSE_DATA],
            data_len: 0,
            resyncs: 0,
            crc_errors: 0,
        }
    }

    /// Re-anchor on the ring's current read position and restart
    pub fn reset(&mut self, rx: &RingQueue<u8>) {
        self.state = RxState::Addr;
        self.err_code = 0;
        self.data_len = 0;
        self.anchor = rx.rd_index();
        self.forward = self.anchor;
    }

    /// Absolute anchor position (frame-start hypothesis)
    #[inline]
    pub fn anchor(&self) -> u32 {
        self.anchor
    }

    /// Absolute forward position (next unread byte)
    #[inline]
    pub fn forward(&self) -> u32 {
        self.forward
    }

    /// Single-byte resynchronisations performed so far
    #[inline]
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Frames rejected on a CRC trailer mismatch
    #[inline]
    pub fn crc_errors(&self) -> u64 {
        self.crc_errors
    }

    /// Consume available bytes and return the first validated frame, if any
    ///
    /// `expected_addr` is the only address accepted in the `Addr` state;
    /// traffic for any other station resynchronises byte by byte. Returns
    /// after at most one emitted frame so the caller can complete the
    /// matching transaction before parsing on.
    pub fn parse(&mut self, rx: &mut RingQueue<u8>, expected_addr: u8) -> Option<ParsedFrame> {
        while self.forward != rx.wr_index() {
            let c = rx.get_at(self.forward);
            self.forward = self.forward.wrapping_add(1);

            match self.state {
                RxState::Addr => {
                    if c == expected_addr {
                        self.cal_crc = crc16_update(CRC_INIT, c);
                        self.state = RxState::Func;
                    } else {
                        self.rebase(rx);
                    }
                }

                RxState::Func => {
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    match self.role {
                        ParserRole::Master => {
                            if c == FC_READ_HOLDING_REGISTERS {
                                self.function = c;
                                self.state = RxState::DataLen;
                            } else if c == FC_WRITE_MULTIPLE_REGISTERS {
                                self.function = c;
                                self.pdu_in = 0;
                                self.pdu_expected = 2;
                                self.state = RxState::Reg;
                            } else if c & 0x80 != 0 {
                                self.function = c & 0x7F;
                                self.state = RxState::Err;
                            } else {
                                self.rebase(rx);
                            }
                        }
                        ParserRole::Slave => {
                            if c == FC_READ_HOLDING_REGISTERS || c == FC_WRITE_MULTIPLE_REGISTERS {
                                self.function = c;
                                self.pdu_in = 0;
                                self.pdu_expected = 2;
                                self.state = RxState::Reg;
                            } else {
                                self.rebase(rx);
                            }
                        }
                    }
                }

                RxState::Err => {
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    self.err_code = c;
                    self.pdu_in = 0;
                    self.pdu_expected = 2;
                    self.state = RxState::Crc;
                }

                RxState::DataLen => {
                    let expected = match self.role {
                        // Read response byte count: bounded by the 125
                        // register ceiling, anything larger cannot frame.
                        ParserRole::Master => {
                            if c as usize > MAX_READ_DATA_BYTES || c == 0 {
                                self.rebase(rx);
                                continue;
                            }
                            c as usize
                        }
                        // Write request byte count: must agree with the
                        // register count parsed just before it.
                        ParserRole::Slave => {
                            let want = self.reg_count as usize * 2;
                            if c as usize != want
                                || c == 0
                                || self.reg_count as usize > MAX_WRITE_REGISTERS
                            {
                                self.rebase(rx);
                                continue;
                            }
                            want
                        }
                    };
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    self.pdu_in = 0;
                    self.pdu_expected = expected;
                    self.data = [0; MAX_PARSE_DATA];
                    self.state = RxState::Data;
                }

                RxState::Data => {
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    self.data[self.pdu_in] = c;
                    self.pdu_in += 1;
                    if self.pdu_in >= self.pdu_expected {
                        self.data_len = self.pdu_in;
                        self.pdu_in = 0;
                        self.pdu_expected = 2;
                        self.state = RxState::Crc;
                    }
                }

                RxState::Reg => {
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    if self.pdu_in == 0 {
                        self.scratch = c;
                        self.pdu_in += 1;
                    } else {
                        self.reg_addr = (self.scratch as u16) << 8 | c as u16;
                        self.pdu_in = 0;
                        self.pdu_expected = 2;
                        self.state = RxState::RegLen;
                    }
                }

                RxState::RegLen => {
                    self.cal_crc = crc16_update(self.cal_crc, c);
                    if self.pdu_in == 0 {
                        self.scratch = c;
                        self.pdu_in += 1;
                    } else {
                        self.reg_count = (self.scratch as u16) << 8 | c as u16;
                        self.pdu_in = 0;
                        self.pdu_expected = 2;
                        self.state =
                            if self.role == ParserRole::Slave && self.function == FC_WRITE_MULTIPLE_REGISTERS {
                                RxState::DataLen
                            } else {
                                RxState::Crc
                            };
                    }
                }

                RxState::Crc => {
                    self.recv_crc[self.pdu_in] = c;
                    self.pdu_in += 1;
                    if self.pdu_in >= self.pdu_expected {
                        let received = crc16_from_wire(self.recv_crc[0], self.recv_crc[1]);
                        if received == self.cal_crc {
                            self.flush(rx);
                            return Some(self.take_frame());
                        }
                        trace!(
                            "crc mismatch: calculated 0x{:04X}, received 0x{:04X}",
                            self.cal_crc,
                            received
                        );
                        self.crc_errors += 1;
                        self.rebase(rx);
                    }
                }
            }
        }
        None
    }

    /// Discard the byte at `anchor` and restart parsing one byte later
    fn rebase(&mut self, rx: &mut RingQueue<u8>) {
        self.state = RxState::Addr;
        self.err_code = 0;
        self.data_len = 0;
        rx.consume_to(self.anchor.wrapping_add(1));
        self.anchor = rx.rd_index();
        self.forward = self.anchor;
        self.resyncs += 1;
    }

    /// Accept the frame: move the read position and anchor past it
    fn flush(&mut self, rx: &mut RingQueue<u8>) {
        self.state = RxState::Addr;
        rx.consume_to(self.forward);
        self.anchor = self.forward;
    }

    fn take_frame(&mut self) -> ParsedFrame {
        let frame = ParsedFrame {
            function: self.function,
            err_code: self.err_code,
            reg_addr: self.reg_addr,
            reg_count: self.reg_count,
            data: self.data,
            data_len: if self.err_code == 0 { self.data_len } else { 0 },
        };
        self.err_code = 0;
        self.data_len = 0;
        frame
    }
}
