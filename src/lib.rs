//! # Voltage RTU - Embedded Modbus RTU Protocol Engine
//!
//! **Author:** Evan Liu <liuyifanz.1996@gmail.com>
//! **Version:** 0.2.0
//! **License:** MIT
//!
//! A poll-driven Modbus RTU protocol engine in pure Rust for half-duplex
//! serial links, designed for embedded gateways, industrial automation and
//! smart grid systems.
//!
//! ## Features
//!
//! - **Master and Slave Roles**: request lifecycle with timeout/retry, and
//!   work-table dispatch with exception encoding
//! - **Cooperative by Design**: no suspension points, no blocking calls; a
//!   tick scheduler drives `poll()` at a known period
//! - **Robust Framing**: byte-driven state machine with CRC-16 validation
//!   and single-byte resynchronisation, immune to DMA-batched delivery
//! - **Memory Safe**: pure Rust implementation with zero unsafe code,
//!   stack-allocated frames, pre-allocated request slots
//! - **Half-Duplex Aware**: explicit direction-control requests for RS-485
//!   transceivers, with pin timing left to the embedder
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Master | Slave |
//! |------|----------|--------|-------|
//! | 0x03 | Read Holding Registers | ✅ | ✅ |
//! | 0x10 | Write Multiple Registers | ✅ | ✅ |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_rtu::{MasterConfig, ModbusMaster, ModbusResult, RtuTransport};
//!
//! # struct Uart;
//! # impl RtuTransport for Uart {
//! #     fn init(&mut self) -> ModbusResult<()> { Ok(()) }
//! #     fn read(&mut self, _dst: &mut [u8]) -> usize { 0 }
//! #     fn write(&mut self, src: &[u8]) -> usize { src.len() }
//! # }
//! fn main() -> ModbusResult<()> {
//!     // The transport wraps the board's UART/DMA/GPIO bring-up.
//!     let mut master = ModbusMaster::new(Uart, MasterConfig::new(10))?;
//!
//!     // Read 2 holding registers from slave 6, starting at address 0.
//!     master.read_03(6, 0x0000, 2, 100, Box::new(|data, err, timed_out| {
//!         match (timed_out, err) {
//!             (true, _) => println!("no response"),
//!             (_, 0) => println!("registers: {:02X?}", data),
//!             (_, err) => println!("exception 0x{:02X}", err),
//!         }
//!     }))?;
//!
//!     loop {
//!         master.poll(); // call every period_ms from the tick scheduler
//! #       break;
//!     }
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants based on official specification
pub mod constants;

/// CRC-16/Modbus computation
pub mod crc;

/// Fixed-capacity SPSC ring queue
pub mod ring;

/// Transport adapter consumed by the protocol engines
pub mod transport;

/// High-performance RTU frame with stack-allocated fixed array
pub mod pdu;

/// Byte-driven frame parser with sliding-window resynchronisation
pub mod parser;

/// Modbus RTU master engine
pub mod master;

/// Modbus RTU slave engine
pub mod slave;

/// Cooperative tick scheduler
pub mod scheduler;

/// Logging system for the library
pub mod logging;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Error handling ===
pub use error::{ExceptionCode, ModbusError, ModbusResult};

// === Master engine ===
pub use master::{MasterConfig, MasterRequest, ModbusMaster, ResponseHandler};

// === Slave engine ===
pub use slave::{ModbusSlave, RegisterBlock, RegisterHandler};

// === Transport seam ===
pub use transport::{Direction, RtuTransport, TransportStats};

// === Scheduling ===
pub use scheduler::{InitFn, TaskFn, TickScheduler};

// === Foundation pieces (advanced usage) ===
pub use parser::{FrameParser, ParsedFrame, ParserRole};
pub use pdu::{ModbusPdu, PduBuilder};
pub use ring::RingQueue;

// === Protocol limits (commonly needed constants) ===
pub use constants::{MAX_FRAME_SIZE, MAX_PDU_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

// === CRC (wire-format checks) ===
pub use crc::{crc16, crc16_update};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!(
        "Voltage RTU v{} - Embedded Modbus RTU protocol engine by Evan Liu",
        VERSION
    )
}
