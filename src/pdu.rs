//! Optimized Modbus RTU frame data structure
//!
//! Use a fixed-size stack array to avoid heap allocation and improve
//! performance. A [`ModbusPdu`] holds a complete RTU ADU: slave address,
//! function code, payload and (once finalised) the little-endian CRC.

use tracing::debug;

use crate::constants::{
    FC_READ_HOLDING_REGISTERS, FC_WRITE_MULTIPLE_REGISTERS, MAX_FRAME_SIZE, MAX_READ_REGISTERS,
    MAX_WRITE_REGISTERS,
};
use crate::crc::crc16;
use crate::error::{ModbusError, ModbusResult};

/// High-performance RTU frame with stack-allocated fixed array
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    /// Fixed-size buffer (stack)
    data: [u8; MAX_FRAME_SIZE],
    /// Actual data length
    len: usize,
}

impl ModbusPdu {
    /// Create an empty frame
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_FRAME_SIZE],
            len: 0,
        }
    }

    /// Create a frame from a byte slice
    #[inline]
    pub fn from_slice(data: &[u8]) -> ModbusResult<Self> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ModbusError::Protocol {
                message: format!(
                    "frame too large: {} bytes (max {})",
                    data.len(),
                    MAX_FRAME_SIZE
                ),
            });
        }

        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte
    #[inline]
    pub fn push(&mut self, byte: u8) -> ModbusResult<()> {
        if self.len >= MAX_FRAME_SIZE {
            return Err(ModbusError::Protocol {
                message: "frame buffer full".to_string(),
            });
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push u16 in big-endian
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> ModbusResult<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)?;
        Ok(())
    }

    /// Extend with a byte slice
    #[inline]
    pub fn extend(&mut self, data: &[u8]) -> ModbusResult<()> {
        if self.len + data.len() > MAX_FRAME_SIZE {
            return Err(ModbusError::Protocol {
                message: format!(
                    "frame would exceed max size: {} + {} > {}",
                    self.len,
                    data.len(),
                    MAX_FRAME_SIZE
                ),
            });
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    /// Compute the CRC over everything pushed so far and append it
    /// little-endian (low byte first, as transmitted in RTU mode)
    #[inline]
    pub fn finalize_crc(&mut self) -> ModbusResult<()> {
        let crc = crc16(&self.data[..self.len]);
        self.push((crc & 0xFF) as u8)?;
        self.push((crc >> 8) as u8)?;
        Ok(())
    }

    /// Get immutable data slice
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Get current length
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Clear the frame
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Get the slave address (first byte)
    #[inline]
    pub fn slave_addr(&self) -> Option<u8> {
        if self.len > 0 {
            Some(self.data[0])
        } else {
            None
        }
    }

    /// Get the function code (second byte)
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        if self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Check if exception response
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code()
            .map(|fc| fc & 0x80 != 0)
            .unwrap_or(false)
    }

    /// Get exception code
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 2 {
            Some(self.data[2])
        } else {
            None
        }
    }

    /// Get human-readable function code description
    pub fn function_code_description(fc: u8) -> &'static str {
        match fc & 0x7F {
            0x03 => "Read Holding Registers",
            0x10 => "Write Multiple Registers",
            _ => "Unknown Function",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Frame builder for the four RTU frame shapes the engines emit
pub struct PduBuilder;

impl PduBuilder {
    /// Build a read holding registers request (FC03)
    ///
    /// `[slave_addr, 0x03, reg_addr_hi, reg_addr_lo, count_hi, count_lo, crc_lo, crc_hi]`
    pub fn build_read_request(
        slave_addr: u8,
        reg_addr: u16,
        reg_count: u16,
    ) -> ModbusResult<ModbusPdu> {
        if reg_count == 0 || reg_count as usize > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data(format!(
                "read register count out of range: {}",
                reg_count
            )));
        }

        let mut pdu = ModbusPdu::new();
        pdu.push(slave_addr)?;
        pdu.push(FC_READ_HOLDING_REGISTERS)?;
        pdu.push_u16(reg_addr)?;
        pdu.push_u16(reg_count)?;
        pdu.finalize_crc()?;

        debug!(
            "frame built: FC=03 addr={} reg=0x{:04X} count={}",
            slave_addr, reg_addr, reg_count
        );
        Ok(pdu)
    }

    /// Build a write multiple registers request (FC16)
    ///
    /// `[slave_addr, 0x10, reg_addr, count, byte_count, data..., crc]`
    pub fn build_write_request(
        slave_addr: u8,
        reg_addr: u16,
        values: &[u16],
    ) -> ModbusResult<ModbusPdu> {
        if values.is_empty() || values.len() > MAX_WRITE_REGISTERS {
            return Err(ModbusError::invalid_data(format!(
                "write register count out of range: {}",
                values.len()
            )));
        }

        let mut pdu = ModbusPdu::new();
        pdu.push(slave_addr)?;
        pdu.push(FC_WRITE_MULTIPLE_REGISTERS)?;
        pdu.push_u16(reg_addr)?;
        pdu.push_u16(values.len() as u16)?;
        pdu.push((values.len() * 2) as u8)?;
        for &value in values {
            pdu.push_u16(value)?;
        }
        pdu.finalize_crc()?;

        debug!(
            "frame built: FC=10 addr={} reg=0x{:04X} count={}",
            slave_addr,
            reg_addr,
            values.len()
        );
        Ok(pdu)
    }

    /// Build a read holding registers response (FC03)
    ///
    /// `[slave_addr, 0x03, byte_count, data..., crc]`
    pub fn build_read_response(slave_addr: u8, values: &[u16]) -> ModbusResult<ModbusPdu> {
        if values.is_empty() || values.len() > MAX_READ_REGISTERS {
            return Err(ModbusError::invalid_data(format!(
                "response register count out of range: {}",
                values.len()
            )));
        }

        let mut pdu = ModbusPdu::new();
        pdu.push(slave_addr)?;
        pdu.push(FC_READ_HOLDING_REGISTERS)?;
        pdu.push((values.len() * 2) as u8)?;
        for &value in values {
            pdu.push_u16(value)?;
        }
        pdu.finalize_crc()?;
        Ok(pdu)
    }

    /// Build a write multiple registers response (FC16)
    ///
    /// `[slave_addr, 0x10, reg_addr, count, crc]`
    pub fn build_write_response(
        slave_addr: u8,
        reg_addr: u16,
        reg_count: u16,
    ) -> ModbusResult<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.push(slave_addr)?;
        pdu.push(FC_WRITE_MULTIPLE_REGISTERS)?;
        pdu.push_u16(reg_addr)?;
        pdu.push_u16(reg_count)?;
        pdu.finalize_crc()?;
        Ok(pdu)
    }

    /// Build an exception response
    ///
    /// `[slave_addr, function | 0x80, err_code, crc]`
    pub fn build_exception(slave_addr: u8, function: u8, err_code: u8) -> ModbusResult<ModbusPdu> {
        let mut pdu = ModbusPdu::new();
        pdu.push(slave_addr)?;
        pdu.push(function | 0x80)?;
        pdu.push(err_code)?;
        pdu.finalize_crc()?;

        debug!(
            "exception frame built: FC={:02X} ({}) err=0x{:02X}",
            function,
            ModbusPdu::function_code_description(function),
            err_code
        );
        Ok(pdu)
    }
}
