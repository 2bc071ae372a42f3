//! Modbus RTU protocol constants based on official specification
//!
//! These constants are derived from the official Modbus specification:
//! - Maximum RTU ADU size: 256 bytes on RS485
//! - Register limits are calculated to fit within the ADU size constraint

// ============================================================================
// Frame Size Constants
// ============================================================================

/// Maximum RTU ADU (Application Data Unit) size
/// Format: Slave Address(1) + PDU(<=253) + CRC(2) = 256 bytes
pub const MAX_FRAME_SIZE: usize = 256;

/// Number of CRC bytes appended to each RTU frame
pub const CRC_LEN: usize = 2;

/// Maximum PDU (Protocol Data Unit) size per Modbus specification
/// RTU ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MAX_PDU_SIZE: usize = MAX_FRAME_SIZE - 1 - CRC_LEN;

/// RX ring capacity used by both engines
///
/// Twice the maximum frame so a complete frame can always be queued behind
/// a partially consumed one. Must stay a power of two for the ring queue.
pub const RX_RING_SIZE: usize = MAX_FRAME_SIZE * 2;

// ============================================================================
// Register Operation Limits
// ============================================================================

/// Maximum number of registers for FC03 (Read Holding Registers)
///
/// Calculation for response PDU:
/// - Function Code: 1 byte
/// - Byte Count: 1 byte
/// - Register Data: N x 2 bytes
/// - Total: 1 + 1 + (N x 2) <= 253, therefore N <= 125
pub const MAX_READ_REGISTERS: usize = 125;

/// Maximum number of registers for FC16 (Write Multiple Registers)
///
/// Calculation for request PDU:
/// - Function Code: 1 byte
/// - Starting Address: 2 bytes
/// - Quantity of Registers: 2 bytes
/// - Byte Count: 1 byte
/// - Register Values: N x 2 bytes
/// - Total: 1 + 2 + 2 + 1 + (N x 2) <= 253, therefore N <= 123
pub const MAX_WRITE_REGISTERS: usize = 123;

/// Maximum payload bytes in a read response (byte-count field ceiling)
pub const MAX_READ_DATA_BYTES: usize = MAX_READ_REGISTERS * 2;

// ============================================================================
// Modbus Function Codes
// ============================================================================

/// Read Holding Registers (FC03)
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;

/// Write Multiple Registers (FC16)
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

/// Exception responses set the high bit of the echoed function code
pub const EXCEPTION_FLAG: u8 = 0x80;

// ============================================================================
// Modbus Exception Codes
// ============================================================================

/// Illegal Function
pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;

/// Illegal Data Address
pub const EXCEPTION_ILLEGAL_DATA_ADDRESS: u8 = 0x02;

/// Illegal Data Value
pub const EXCEPTION_ILLEGAL_DATA_VALUE: u8 = 0x03;

/// Slave Device Failure
pub const EXCEPTION_SLAVE_DEVICE_FAILURE: u8 = 0x04;

/// Slave Device Busy
pub const EXCEPTION_SLAVE_DEVICE_BUSY: u8 = 0x06;

// ============================================================================
// Slave Addressing
// ============================================================================

/// Lowest assignable slave address
pub const SLAVE_ADDR_MIN: u8 = 1;

/// Highest assignable slave address (248-255 are reserved)
pub const SLAVE_ADDR_MAX: u8 = 247;

// ============================================================================
// Master Engine Defaults
// ============================================================================

/// Default request-slot pool size
pub const DEFAULT_MAX_REQUESTS: usize = 32;

/// Default number of transmission attempts when retries are enabled
pub const DEFAULT_MASTER_REPEATS: u8 = 3;

/// Auxiliary write-data ring capacity, in registers
///
/// Large enough for every slot in a full default pool to carry a maximum
/// write payload (32 x 123 = 3936), rounded up to a power of two.
pub const WRITE_RING_SIZE: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MAX_FRAME_SIZE, 256);
        assert_eq!(MAX_PDU_SIZE, 253);
        assert!(RX_RING_SIZE.is_power_of_two());
    }

    #[test]
    fn test_register_limits() {
        // Verify read register limit calculation
        let read_pdu_size = 1 + 1 + (MAX_READ_REGISTERS * 2);
        assert!(read_pdu_size <= MAX_PDU_SIZE);
        assert_eq!(MAX_READ_REGISTERS, 125);

        // Verify write register limit calculation
        let write_pdu_size = 1 + 2 + 2 + 1 + (MAX_WRITE_REGISTERS * 2);
        assert!(write_pdu_size <= MAX_PDU_SIZE);
        assert_eq!(MAX_WRITE_REGISTERS, 123);
    }

    #[test]
    fn test_write_ring_holds_full_pool() {
        assert!(WRITE_RING_SIZE >= DEFAULT_MAX_REQUESTS * MAX_WRITE_REGISTERS);
        assert!(WRITE_RING_SIZE.is_power_of_two());
    }
}
