//! Modbus RTU slave engine
//!
//! Address-filtered request dispatcher for the slave side of a half-duplex
//! link. Validated requests are routed through a work table of
//! non-overlapping register blocks; the matching handler fills (FC03) or
//! consumes (FC16) a register buffer, and the engine assembles the success
//! or exception response.
//!
//! Statistics note: on the slave side [`TransportStats::responses_received`]
//! counts accepted request frames and [`TransportStats::requests_sent`]
//! counts emitted responses.
//!
//! # Example
//!
//! ```rust,no_run
//! use voltage_rtu::{ModbusSlave, ModbusResult, RegisterBlock};
//! # use voltage_rtu::RtuTransport;
//! # struct Uart;
//! # impl RtuTransport for Uart {
//! #     fn init(&mut self) -> ModbusResult<()> { Ok(()) }
//! #     fn read(&mut self, _dst: &mut [u8]) -> usize { 0 }
//! #     fn write(&mut self, src: &[u8]) -> usize { src.len() }
//! # }
//!
//! # fn main() -> ModbusResult<()> {
//! let blocks = vec![RegisterBlock::new(
//!     0x0000,
//!     0x0010,
//!     Box::new(|_function, reg, _count, regs| {
//!         for (i, slot) in regs.iter_mut().enumerate() {
//!             *slot = reg + i as u16; // echo the register addresses
//!         }
//!         Ok(())
//!     }),
//! )];
//!
//! let mut slave = ModbusSlave::new(Uart, 0x06, blocks)?;
//! loop {
//!     slave.poll(); // invoke every period_ms from the tick scheduler
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, trace, warn};

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_FRAME_SIZE, MAX_READ_REGISTERS,
    RX_RING_SIZE, SLAVE_ADDR_MAX, SLAVE_ADDR_MIN,
};
use crate::error::{ExceptionCode, ModbusError, ModbusResult};
use crate::parser::{FrameParser, ParsedFrame, ParserRole};
use crate::pdu::{ModbusPdu, PduBuilder};
use crate::ring::RingQueue;
use crate::transport::{Direction, RtuTransport, TransportStats};

/// Register-range handler: `(function, reg_addr, reg_count, regs)`
///
/// For FC03 the handler fills `regs` with the current register values; for
/// FC16 `regs` carries the values written by the master. Returning an
/// [`ExceptionCode`] turns the reply into an exception response.
pub type RegisterHandler =
    Box<dyn FnMut(u8, u16, u16, &mut [u16]) -> Result<(), ExceptionCode> + Send>;

/// Work-table entry mapping the half-open range `[reg_start, reg_end)` to
/// a handler
pub struct RegisterBlock {
    /// First register address covered by this block
    pub reg_start: u16,
    /// One past the last register address covered by this block
    pub reg_end: u16,
    handler: RegisterHandler,
}

impl RegisterBlock {
    /// Create a work-table entry
    pub fn new(reg_start: u16, reg_end: u16, handler: RegisterHandler) -> Self {
        Self {
            reg_start,
            reg_end,
            handler,
        }
    }

    /// True when `[reg_addr, reg_addr + reg_count)` lies fully inside this
    /// block
    fn contains(&self, reg_addr: u16, reg_count: u16) -> bool {
        let last = reg_addr as u32 + reg_count as u32 - 1;
        reg_addr >= self.reg_start && last < self.reg_end as u32
    }
}

/// Poll-driven Modbus RTU slave
pub struct ModbusSlave<T: RtuTransport> {
    transport: T,
    own_addr: u8,
    blocks: Vec<RegisterBlock>,
    rx: RingQueue<u8>,
    parser: FrameParser,
    stats: TransportStats,
}

impl<T: RtuTransport> ModbusSlave<T> {
    /// Create a slave engine over the given transport
    ///
    /// Validates the station address (1-247) and the work table: every
    /// block must be a non-empty range and no two blocks may overlap.
    pub fn new(mut transport: T, own_addr: u8, blocks: Vec<RegisterBlock>) -> ModbusResult<Self> {
        if !(SLAVE_ADDR_MIN..=SLAVE_ADDR_MAX).contains(&own_addr) {
            return Err(ModbusError::invalid_argument(format!(
                "slave address out of range: {}",
                own_addr
            )));
        }
        if blocks.is_empty() {
            return Err(ModbusError::invalid_argument("work table must not be empty"));
        }
        for block in &blocks {
            if block.reg_start >= block.reg_end {
                return Err(ModbusError::invalid_argument(format!(
                    "empty register block: 0x{:04X}..0x{:04X}",
                    block.reg_start, block.reg_end
                )));
            }
        }
        let mut ranges: Vec<(u16, u16)> =
            blocks.iter().map(|b| (b.reg_start, b.reg_end)).collect();
        ranges.sort_unstable();
        for pair in ranges.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(ModbusError::invalid_argument(format!(
                    "overlapping register blocks: 0x{:04X}..0x{:04X} and 0x{:04X}..0x{:04X}",
                    pair[0].0, pair[0].1, pair[1].0, pair[1].1
                )));
            }
        }

        transport.init()?;

        Ok(Self {
            transport,
            own_addr,
            blocks,
            rx: RingQueue::with_capacity(RX_RING_SIZE)?,
            parser: FrameParser::new(ParserRole::Slave),
            stats: TransportStats::default(),
        })
    }

    /// Station address this engine answers to
    #[inline]
    pub fn own_addr(&self) -> u8 {
        self.own_addr
    }

    /// Reference to the underlying transport
    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable reference to the underlying transport
    #[inline]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Transfer statistics
    #[inline]
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// One scheduler tick: drain the transport, answer every valid request
    pub fn poll(&mut self) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = self.transport.read(&mut buf);
        if n > 0 {
            self.stats.bytes_received += n as u64;
            let queued = self.rx.push_slice(&buf[..n]);
            if queued < n {
                warn!("rx ring overflow: dropped {} bytes", n - queued);
            }
        }

        while let Some(frame) = self.parser.parse(&mut self.rx, self.own_addr) {
            self.stats.responses_received += 1;
            self.handle_frame(frame);
        }
        self.stats.crc_errors = self.parser.crc_errors();
    }

    /// Dispatch one validated request and emit the reply
    fn handle_frame(&mut self, frame: ParsedFrame) {
        trace!(
            "request accepted: FC={:02X} reg=0x{:04X} count={}",
            frame.function,
            frame.reg_addr,
            frame.reg_count
        );

        // The parser bounds FC16 counts via the byte-count field; FC03
        // counts are only limited by the protocol ceiling checked here.
        if frame.reg_count == 0 || frame.reg_count as usize > MAX_READ_REGISTERS {
            self.send_exception(frame.function, ExceptionCode::IllegalDataValue);
            return;
        }

        let count = frame.reg_count as usize;
        let block_idx = match self
            .blocks
            .iter()
            .position(|b| b.contains(frame.reg_addr, frame.reg_count))
        {
            Some(idx) => idx,
            None => {
                debug!(
                    "no register block contains 0x{:04X}+{}",
                    frame.reg_addr, frame.reg_count
                );
                self.send_exception(frame.function, ExceptionCode::IllegalDataAddress);
                return;
            }
        };

        let mut regs = [0u16; MAX_READ_REGISTERS];
        if frame.function == FC_WRITE_MULTIPLE_REGISTERS {
            for (i, pair) in frame.data().chunks_exact(2).enumerate() {
                regs[i] = (pair[0] as u16) << 8 | pair[1] as u16;
            }
        }

        let result = (self.blocks[block_idx].handler)(
            frame.function,
            frame.reg_addr,
            frame.reg_count,
            &mut regs[..count],
        );

        let response = match result {
            Err(code) => {
                debug!("handler raised exception: {}", code);
                PduBuilder::build_exception(self.own_addr, frame.function, code.to_u8())
            }
            Ok(()) => match frame.function {
                FC_READ_HOLDING_REGISTERS => {
                    PduBuilder::build_read_response(self.own_addr, &regs[..count])
                }
                _ => PduBuilder::build_write_response(self.own_addr, frame.reg_addr, frame.reg_count),
            },
        };

        match response {
            Ok(pdu) => self.send_response(&pdu),
            Err(err) => warn!("dropping unserialisable response: {}", err),
        }
    }

    fn send_exception(&mut self, function: u8, code: ExceptionCode) {
        match PduBuilder::build_exception(self.own_addr, function, code.to_u8()) {
            Ok(pdu) => self.send_response(&pdu),
            Err(err) => warn!("dropping unserialisable exception: {}", err),
        }
    }

    /// Emit a response, bracketed by the direction-control requests
    fn send_response(&mut self, pdu: &ModbusPdu) {
        self.transport.dir_ctrl(Direction::TxOnly);
        let written = self.transport.write(pdu.as_slice());
        self.stats.bytes_sent += written as u64;
        self.stats.requests_sent += 1;
        if written < pdu.len() {
            warn!("short write: transport accepted {} of {} bytes", written, pdu.len());
        }
        self.transport.dir_ctrl(Direction::RxOnly);
    }
}
