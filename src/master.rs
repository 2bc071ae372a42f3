//! Modbus RTU master engine
//!
//! Poll-driven request/response engine for the master side of a half-duplex
//! link. Requests are queued into a pre-allocated slot pool and transmitted
//! strictly in FIFO order: the response to request *n* is received (or its
//! final retry times out) before request *n+1* goes on the wire. Exclusive
//! wire access is modelled by a binary send permit owned by the head of the
//! queue.
//!
//! One [`ModbusMaster::poll`] call is one scheduler tick; all timeouts are
//! measured in multiples of the poll period, so the effective timeout
//! resolution is `period_ms`.
//!
//! # Example
//!
//! ```rust,no_run
//! use voltage_rtu::{MasterConfig, ModbusMaster, ModbusResult};
//! # use voltage_rtu::RtuTransport;
//! # struct Uart;
//! # impl RtuTransport for Uart {
//! #     fn init(&mut self) -> ModbusResult<()> { Ok(()) }
//! #     fn read(&mut self, _dst: &mut [u8]) -> usize { 0 }
//! #     fn write(&mut self, src: &[u8]) -> usize { src.len() }
//! # }
//!
//! # fn main() -> ModbusResult<()> {
//! let mut master = ModbusMaster::new(Uart, MasterConfig::new(10))?;
//!
//! // Read two holding registers from slave 6, 100 ms budget per attempt.
//! master.read_03(6, 0x0000, 2, 100, Box::new(|data, err, timed_out| {
//!     if !timed_out && err == 0 {
//!         println!("registers: {:02X?}", data);
//!     }
//! }))?;
//!
//! loop {
//!     master.poll(); // invoke every period_ms from the tick scheduler
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

use tracing::{debug, trace, warn};

use crate::constants::{
    DEFAULT_MASTER_REPEATS, DEFAULT_MAX_REQUESTS, FC_READ_HOLDING_REGISTERS,
    FC_WRITE_MULTIPLE_REGISTERS, MAX_FRAME_SIZE, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS,
    RX_RING_SIZE, WRITE_RING_SIZE,
};
use crate::error::{ModbusError, ModbusResult};
use crate::parser::{FrameParser, ParsedFrame, ParserRole};
use crate::pdu::PduBuilder;
use crate::ring::RingQueue;
use crate::transport::{Direction, RtuTransport, TransportStats};

/// Completion callback: `(data, err_code, timed_out)`
///
/// `data` carries the register bytes of a read response and is empty for
/// write echoes, exceptions and timeouts. `err_code` is the peer's
/// exception code (zero for success), `timed_out` is set when the final
/// retry expired without a valid response.
pub type ResponseHandler = Box<dyn FnMut(&[u8], u8, bool) + Send>;

/// One master transaction to be queued with [`ModbusMaster::submit`]
pub struct MasterRequest {
    /// Station address of the target slave
    pub slave_addr: u8,
    /// Function code: 0x03 or 0x10
    pub function: u8,
    /// First register address
    pub reg_addr: u16,
    /// Number of registers to read or write
    pub reg_count: u16,
    /// Per-attempt response budget; must be non-zero
    pub timeout_ms: u32,
    /// Completion callback; may be omitted when no reply handling is needed
    pub on_response: Option<ResponseHandler>,
}

/// Master engine configuration
///
/// # Example
///
/// ```rust
/// use voltage_rtu::MasterConfig;
///
/// // 10 ms poll period, single attempt per request
/// let config = MasterConfig::new(10).without_retries();
/// assert!(!config.retries_enabled);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    /// Poll period the engine is driven at; also the timeout resolution
    pub period_ms: u32,
    /// Transmission attempts per request when retries are enabled
    pub repeats: u8,
    /// When disabled, every request gets exactly one attempt
    pub retries_enabled: bool,
    /// Request-slot pool size
    pub max_requests: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            period_ms: 10,
            repeats: DEFAULT_MASTER_REPEATS,
            retries_enabled: true,
            max_requests: DEFAULT_MAX_REQUESTS,
        }
    }
}

impl MasterConfig {
    /// Create a configuration with the given poll period
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            ..Default::default()
        }
    }

    /// Set the number of transmission attempts
    pub fn with_repeats(mut self, repeats: u8) -> Self {
        self.repeats = repeats;
        self
    }

    /// Disable retransmission: one attempt, then the timeout callback
    pub fn without_retries(mut self) -> Self {
        self.retries_enabled = false;
        self
    }

    /// Set the request-slot pool size
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Attempts granted to each request under this configuration
    #[inline]
    pub fn max_attempts(&self) -> u8 {
        if self.retries_enabled {
            self.repeats
        } else {
            1
        }
    }
}

/// Request slot: one queued transaction plus its lifecycle state
struct RequestSlot {
    slave_addr: u8,
    function: u8,
    reg_addr: u16,
    reg_count: u16,
    timeout_ms: u32,
    /// Registers queued in the auxiliary write ring for this slot
    write_len: u16,
    elapsed_ms: u32,
    attempts: u8,
    in_use: bool,
    handler: Option<ResponseHandler>,
}

impl Default for RequestSlot {
    fn default() -> Self {
        Self {
            slave_addr: 0,
            function: 0,
            reg_addr: 0,
            reg_count: 0,
            timeout_ms: 0,
            write_len: 0,
            elapsed_ms: 0,
            attempts: 0,
            in_use: false,
            handler: None,
        }
    }
}

/// Poll-driven Modbus RTU master
pub struct ModbusMaster<T: RtuTransport> {
    transport: T,
    config: MasterConfig,
    rx: RingQueue<u8>,
    parser: FrameParser,
    slots: Vec<RequestSlot>,
    /// FIFO of slot indices; every entry refers to a slot with `in_use`
    fifo: RingQueue<u32>,
    /// Write payloads copied at submit time, drained on completion
    write_data: RingQueue<u16>,
    /// Binary token: `true` exactly when nothing is on the wire
    send_permit: bool,
    stats: TransportStats,
}

impl<T: RtuTransport> ModbusMaster<T> {
    /// Create a master engine over the given transport
    ///
    /// Initialises the RX ring, slot pool and request FIFO, then calls
    /// `transport.init()`. Fails on a zero poll period, an empty pool or a
    /// transport initialisation error.
    pub fn new(mut transport: T, config: MasterConfig) -> ModbusResult<Self> {
        if config.period_ms == 0 {
            return Err(ModbusError::configuration("poll period must be non-zero"));
        }
        if config.max_requests == 0 {
            return Err(ModbusError::configuration("request pool must not be empty"));
        }
        if config.retries_enabled && config.repeats == 0 {
            return Err(ModbusError::configuration(
                "repeats must be non-zero when retries are enabled",
            ));
        }

        let rx = RingQueue::with_capacity(RX_RING_SIZE)?;
        let fifo = RingQueue::with_capacity(config.max_requests.next_power_of_two())?;
        let write_data = RingQueue::with_capacity(WRITE_RING_SIZE)?;

        let mut slots = Vec::with_capacity(config.max_requests);
        slots.resize_with(config.max_requests, RequestSlot::default);

        transport.init()?;

        Ok(Self {
            transport,
            config,
            rx,
            parser: FrameParser::new(ParserRole::Master),
            slots,
            fifo,
            write_data,
            send_permit: true,
            stats: TransportStats::default(),
        })
    }

    /// Engine configuration
    #[inline]
    pub fn config(&self) -> &MasterConfig {
        &self.config
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

    /// Number of queued transactions, including the one in flight
    #[inline]
    pub fn pending_requests(&self) -> usize {
        self.fifo.len()
    }

    /// True when no transaction is queued or in flight
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Send-permit state: `true` exactly when nothing is on the wire
    #[inline]
    pub fn send_permit(&self) -> bool {
        self.send_permit
    }

    /// Queue a read holding registers transaction (FC03)
    pub fn read_03(
        &mut self,
        slave_addr: u8,
        reg_addr: u16,
        reg_count: u16,
        timeout_ms: u32,
        on_response: ResponseHandler,
    ) -> ModbusResult<()> {
        self.submit(
            MasterRequest {
                slave_addr,
                function: FC_READ_HOLDING_REGISTERS,
                reg_addr,
                reg_count,
                timeout_ms,
                on_response: Some(on_response),
            },
            None,
        )
    }

    /// Queue a write multiple registers transaction (FC16)
    pub fn write_10(
        &mut self,
        slave_addr: u8,
        reg_addr: u16,
        values: &[u16],
        timeout_ms: u32,
        on_response: Option<ResponseHandler>,
    ) -> ModbusResult<()> {
        self.submit(
            MasterRequest {
                slave_addr,
                function: FC_WRITE_MULTIPLE_REGISTERS,
                reg_addr,
                reg_count: values.len() as u16,
                timeout_ms,
                on_response,
            },
            Some(values),
        )
    }

    /// Queue a transaction
    ///
    /// Validates the request, acquires a free slot and copies the write
    /// payload (FC16) into the auxiliary ring so the caller's buffer need
    /// not outlive the request. Rejected submissions leave no state behind.
    pub fn submit(
        &mut self,
        request: MasterRequest,
        reg_data: Option<&[u16]>,
    ) -> ModbusResult<()> {
        match request.function {
            FC_READ_HOLDING_REGISTERS => {
                if request.reg_count == 0 || request.reg_count as usize > MAX_READ_REGISTERS {
                    return Err(ModbusError::invalid_data(format!(
                        "read register count out of range: {}",
                        request.reg_count
                    )));
                }
            }
            FC_WRITE_MULTIPLE_REGISTERS => {
                if request.reg_count == 0 || request.reg_count as usize > MAX_WRITE_REGISTERS {
                    return Err(ModbusError::invalid_data(format!(
                        "write register count out of range: {}",
                        request.reg_count
                    )));
                }
                let data = reg_data.ok_or_else(|| {
                    ModbusError::invalid_argument("write request without register data")
                })?;
                if data.len() != request.reg_count as usize {
                    return Err(ModbusError::invalid_argument(format!(
                        "register data length {} does not match request count {}",
                        data.len(),
                        request.reg_count
                    )));
                }
            }
            code => return Err(ModbusError::InvalidFunction { code }),
        }
        if request.timeout_ms == 0 {
            return Err(ModbusError::invalid_argument("timeout must be non-zero"));
        }

        let write_len = if request.function == FC_WRITE_MULTIPLE_REGISTERS {
            request.reg_count as usize
        } else {
            0
        };
        if self.write_data.remaining_space() < write_len {
            return Err(ModbusError::resource_exhausted("write data ring full"));
        }

        let idx = self
            .slots
            .iter()
            .position(|slot| !slot.in_use)
            .ok_or_else(|| ModbusError::resource_exhausted("no free request slot"))?;

        debug!(
            "submit: slave={} FC={:02X} reg=0x{:04X} count={} timeout={}ms slot={}",
            request.slave_addr,
            request.function,
            request.reg_addr,
            request.reg_count,
            request.timeout_ms,
            idx
        );

        self.slots[idx] = RequestSlot {
            slave_addr: request.slave_addr,
            function: request.function,
            reg_addr: request.reg_addr,
            reg_count: request.reg_count,
            timeout_ms: request.timeout_ms,
            write_len: write_len as u16,
            elapsed_ms: 0,
            attempts: 0,
            in_use: true,
            handler: request.on_response,
        };
        if let Some(data) = reg_data {
            if write_len > 0 {
                self.write_data.push_slice(&data[..write_len]);
            }
        }
        self.fifo.push_slice(&[idx as u32]);
        Ok(())
    }

    /// One scheduler tick: receive step, then transmit step
    pub fn poll(&mut self) {
        self.receive_step();
        self.transmit_step();
    }

    fn head(&self) -> Option<usize> {
        let mut head = [0u32; 1];
        if self.fifo.peek_slice(&mut head) == 0 {
            None
        } else {
            Some(head[0] as usize)
        }
    }

    /// Drain the transport and run the parser against the head request
    fn receive_step(&mut self) {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let n = self.transport.read(&mut buf);
        if n > 0 {
            self.stats.bytes_received += n as u64;
            let queued = self.rx.push_slice(&buf[..n]);
            if queued < n {
                warn!("rx ring overflow: dropped {} bytes", n - queued);
            }
        }

        let head = match self.head() {
            Some(idx) => idx,
            None => {
                self.discard_unsolicited();
                return;
            }
        };

        // A frame may only complete a request that has been transmitted at
        // least once; anything arriving earlier is a straggler from a past
        // exchange and must not be matched against this request.
        if self.slots[head].attempts == 0 {
            self.discard_unsolicited();
            return;
        }

        let expected = self.slots[head].slave_addr;
        if let Some(frame) = self.parser.parse(&mut self.rx, expected) {
            trace!(
                "response accepted: FC={:02X} err=0x{:02X} len={}",
                frame.function,
                frame.err_code,
                frame.data().len()
            );
            self.complete_head(Some(frame));
        }
        self.stats.crc_errors = self.parser.crc_errors();
    }

    fn discard_unsolicited(&mut self) {
        if !self.rx.is_empty() {
            trace!("discarding {} unsolicited bytes", self.rx.len());
            self.rx.clear();
            self.parser.reset(&self.rx);
        }
    }

    /// Transmit the head request or advance its timeout accounting
    fn transmit_step(&mut self) {
        let head = match self.head() {
            Some(idx) => idx,
            None => return,
        };

        if self.send_permit && self.slots[head].elapsed_ms == 0 {
            self.send_permit = false;
            self.slots[head].attempts += 1;
            if self.slots[head].attempts > 1 {
                debug!(
                    "retransmitting: slave={} FC={:02X} attempt {}/{}",
                    self.slots[head].slave_addr,
                    self.slots[head].function,
                    self.slots[head].attempts,
                    self.config.max_attempts()
                );
            }
            self.transmit_head(head);
            self.slots[head].elapsed_ms = self.config.period_ms;
        } else if self.slots[head].attempts > 0 {
            self.slots[head].elapsed_ms =
                self.slots[head].elapsed_ms.saturating_add(self.config.period_ms);
            if self.slots[head].elapsed_ms > self.slots[head].timeout_ms {
                if self.slots[head].attempts < self.config.max_attempts() {
                    debug!(
                        "timeout: slave={} FC={:02X}, retrying",
                        self.slots[head].slave_addr, self.slots[head].function
                    );
                    // Nothing is on the wire during the retry gap: the
                    // permit goes back to idle and the next tick's transmit
                    // branch re-acquires it.
                    self.slots[head].elapsed_ms = 0;
                    self.send_permit = true;
                } else {
                    warn!(
                        "request failed: slave={} FC={:02X} after {} attempts",
                        self.slots[head].slave_addr,
                        self.slots[head].function,
                        self.slots[head].attempts
                    );
                    self.complete_head(None);
                }
            }
        }
    }

    /// Serialise and emit the head request
    fn transmit_head(&mut self, idx: usize) {
        let slave_addr = self.slots[idx].slave_addr;
        let function = self.slots[idx].function;
        let reg_addr = self.slots[idx].reg_addr;
        let reg_count = self.slots[idx].reg_count;
        let write_len = self.slots[idx].write_len as usize;

        let pdu = if function == FC_WRITE_MULTIPLE_REGISTERS {
            let mut values = [0u16; MAX_WRITE_REGISTERS];
            self.write_data.peek_slice(&mut values[..write_len]);
            PduBuilder::build_write_request(slave_addr, reg_addr, &values[..write_len])
        } else {
            PduBuilder::build_read_request(slave_addr, reg_addr, reg_count)
        };
        // Requests are validated at submit time, so this cannot fail; a
        // defect here must not take the poll loop down.
        let pdu = match pdu {
            Ok(pdu) => pdu,
            Err(err) => {
                warn!("dropping unserialisable request: {}", err);
                self.complete_head(None);
                return;
            }
        };

        self.transport.dir_ctrl(Direction::TxOnly);
        let written = self.transport.write(pdu.as_slice());
        self.stats.bytes_sent += written as u64;
        self.stats.requests_sent += 1;
        if written < pdu.len() {
            // Short writes are indistinguishable from a lost frame; the
            // timeout machinery reports them.
            warn!("short write: transport accepted {} of {} bytes", written, pdu.len());
        }
    }

    /// Pop the head slot and finish its transaction
    ///
    /// `frame` is the validated response, or `None` on final timeout. The
    /// slot is released and the permit returned before the user callback
    /// runs, so engine invariants hold even if the callback queues work.
    fn complete_head(&mut self, frame: Option<ParsedFrame>) {
        let mut head = [0u32; 1];
        if self.fifo.pop_slice(&mut head) == 0 {
            return;
        }
        let idx = head[0] as usize;

        let write_len = self.slots[idx].write_len as usize;
        if write_len > 0 {
            let mut discard = [0u16; MAX_WRITE_REGISTERS];
            self.write_data.pop_slice(&mut discard[..write_len]);
        }

        let mut handler = self.slots[idx].handler.take();
        self.slots[idx] = RequestSlot::default();
        self.send_permit = true;
        self.transport.dir_ctrl(Direction::RxOnly);

        match frame {
            Some(frame) => {
                self.stats.responses_received += 1;
                if let Some(handler) = handler.as_mut() {
                    handler(frame.data(), frame.err_code, false);
                }
            }
            None => {
                self.stats.timeouts += 1;
                if let Some(handler) = handler.as_mut() {
                    handler(&[], 0, true);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc16;
    use std::sync::{Arc, Mutex};

    /// Scripted in-memory transport: writes are captured, reads are served
    /// from pre-loaded byte runs.
    #[derive(Default)]
    struct ScriptInner {
        rx: Vec<u8>,
        writes: Vec<Vec<u8>>,
        directions: Vec<Direction>,
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        inner: Arc<Mutex<ScriptInner>>,
    }

    impl ScriptedTransport {
        fn feed(&self, bytes: &[u8]) {
            self.inner.lock().unwrap().rx.extend_from_slice(bytes);
        }

        fn writes(&self) -> Vec<Vec<u8>> {
            self.inner.lock().unwrap().writes.clone()
        }
    }

    impl RtuTransport for ScriptedTransport {
        fn init(&mut self) -> ModbusResult<()> {
            Ok(())
        }

        fn read(&mut self, dst: &mut [u8]) -> usize {
            let mut inner = self.inner.lock().unwrap();
            let n = dst.len().min(inner.rx.len());
            dst[..n].copy_from_slice(&inner.rx[..n]);
            inner.rx.drain(..n);
            n
        }

        fn write(&mut self, src: &[u8]) -> usize {
            self.inner.lock().unwrap().writes.push(src.to_vec());
            src.len()
        }

        fn dir_ctrl(&mut self, dir: Direction) {
            self.inner.lock().unwrap().directions.push(dir);
        }
    }

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let crc = crc16(body);
        let mut frame = body.to_vec();
        frame.push((crc & 0xFF) as u8);
        frame.push((crc >> 8) as u8);
        frame
    }

    type Outcome = (Vec<u8>, u8, bool);

    fn recording_handler(log: Arc<Mutex<Vec<Outcome>>>) -> ResponseHandler {
        Box::new(move |data, err, timed_out| {
            log.lock().unwrap().push((data.to_vec(), err, timed_out));
        })
    }

    #[test]
    fn test_new_rejects_bad_config() {
        assert!(ModbusMaster::new(ScriptedTransport::default(), MasterConfig::new(0)).is_err());
        assert!(ModbusMaster::new(
            ScriptedTransport::default(),
            MasterConfig::new(10).with_max_requests(0)
        )
        .is_err());
        assert!(ModbusMaster::new(
            ScriptedTransport::default(),
            MasterConfig::new(10).with_repeats(0)
        )
        .is_err());
        assert!(ModbusMaster::new(
            ScriptedTransport::default(),
            MasterConfig::new(10).with_repeats(0).without_retries()
        )
        .is_ok());
    }

    #[test]
    fn test_submit_validation() {
        let mut master =
            ModbusMaster::new(ScriptedTransport::default(), MasterConfig::new(10)).unwrap();

        // zero timeout
        assert!(master
            .read_03(6, 0, 2, 0, Box::new(|_, _, _| {}))
            .is_err());
        // count out of range
        assert!(master
            .read_03(6, 0, 126, 100, Box::new(|_, _, _| {}))
            .is_err());
        // write payload length mismatch
        assert!(master
            .submit(
                MasterRequest {
                    slave_addr: 6,
                    function: FC_WRITE_MULTIPLE_REGISTERS,
                    reg_addr: 0,
                    reg_count: 2,
                    timeout_ms: 100,
                    on_response: None,
                },
                Some(&[0x0001]),
            )
            .is_err());
        // unsupported function code
        assert!(master
            .submit(
                MasterRequest {
                    slave_addr: 6,
                    function: 0x04,
                    reg_addr: 0,
                    reg_count: 1,
                    timeout_ms: 100,
                    on_response: None,
                },
                None,
            )
            .is_err());
        assert!(master.is_idle());
    }

    #[test]
    fn test_pool_exhaustion_rejects_submit() {
        let config = MasterConfig::new(10).with_max_requests(2);
        let mut master = ModbusMaster::new(ScriptedTransport::default(), config).unwrap();

        assert!(master.read_03(6, 0, 1, 100, Box::new(|_, _, _| {})).is_ok());
        assert!(master.read_03(6, 0, 1, 100, Box::new(|_, _, _| {})).is_ok());
        let err = master
            .read_03(6, 0, 1, 100, Box::new(|_, _, _| {}))
            .unwrap_err();
        assert!(matches!(err, ModbusError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_completed_slot_returns_to_pool() {
        let transport = ScriptedTransport::default();
        let config = MasterConfig::new(10).with_max_requests(1);
        let mut master = ModbusMaster::new(transport.clone(), config).unwrap();

        master.read_03(0x06, 0, 1, 100, Box::new(|_, _, _| {})).unwrap();
        assert!(master.read_03(0x06, 0, 1, 100, Box::new(|_, _, _| {})).is_err());

        master.poll();
        transport.feed(&with_crc(&[0x06, 0x03, 0x02, 0x00, 0x01]));
        master.poll();

        assert!(master.is_idle());
        // The released slot is available again.
        assert!(master.read_03(0x06, 0, 1, 100, Box::new(|_, _, _| {})).is_ok());
    }

    #[test]
    fn test_read_exchange_completes() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        master
            .read_03(0x06, 0x0000, 2, 100, recording_handler(log.clone()))
            .unwrap();

        master.poll(); // transmits the request
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], with_crc(&[0x06, 0x03, 0x00, 0x00, 0x00, 0x02]));
        assert!(!master.send_permit());

        transport.feed(&with_crc(&[0x06, 0x03, 0x04, 0x00, 0x11, 0x00, 0x22]));
        master.poll();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (vec![0x00, 0x11, 0x00, 0x22], 0, false));
        drop(log);
        assert!(master.is_idle());
        assert!(master.send_permit());
        assert_eq!(master.stats().responses_received, 1);
    }

    #[test]
    fn test_write_exchange_copies_payload() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        // Caller's buffer is dropped before the transmit tick.
        {
            let values = vec![0x00AA, 0x00BB];
            master
                .write_10(0x06, 0x0010, &values, 100, Some(recording_handler(log.clone())))
                .unwrap();
        }

        master.poll();
        let writes = transport.writes();
        assert_eq!(
            writes[0],
            with_crc(&[0x06, 0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x00, 0xAA, 0x00, 0xBB])
        );

        transport.feed(&with_crc(&[0x06, 0x10, 0x00, 0x10, 0x00, 0x02]));
        master.poll();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (vec![], 0, false));
    }

    #[test]
    fn test_exception_response_surfaces_err_code() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        master
            .read_03(0x06, 0x0000, 2, 100, recording_handler(log.clone()))
            .unwrap();
        master.poll();

        transport.feed(&with_crc(&[0x06, 0x83, 0x02]));
        master.poll();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (vec![], 0x02, false));
    }

    #[test]
    fn test_silent_peer_times_out_once_after_retries() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        master
            .read_03(0x06, 0x0000, 2, 30, recording_handler(log.clone()))
            .unwrap();

        // Default: 3 attempts, each with a 30 ms budget at a 10 ms period.
        for _ in 0..20 {
            master.poll();
        }

        assert_eq!(transport.writes().len(), 3);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (vec![], 0, true));
        drop(log);
        assert!(master.is_idle());
        assert!(master.send_permit());
        assert_eq!(master.stats().timeouts, 1);
    }

    #[test]
    fn test_no_retries_single_attempt() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = MasterConfig::new(10).without_retries();
        let mut master = ModbusMaster::new(transport.clone(), config).unwrap();

        master
            .read_03(0x06, 0x0000, 2, 30, recording_handler(log.clone()))
            .unwrap();
        for _ in 0..10 {
            master.poll();
        }

        assert_eq!(transport.writes().len(), 1);
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].2);
    }

    #[test]
    fn test_fifo_order_is_strict() {
        let transport = ScriptedTransport::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        for tag in [1u8, 2] {
            let order = order.clone();
            master
                .read_03(
                    0x06,
                    tag as u16,
                    1,
                    100,
                    Box::new(move |_, _, _| order.lock().unwrap().push(tag)),
                )
                .unwrap();
        }

        // Only the head may transmit before its exchange completes.
        master.poll();
        master.poll();
        assert_eq!(transport.writes().len(), 1);

        transport.feed(&with_crc(&[0x06, 0x03, 0x02, 0x00, 0x01]));
        master.poll(); // completes head, transmits second
        assert_eq!(transport.writes().len(), 2);

        transport.feed(&with_crc(&[0x06, 0x03, 0x02, 0x00, 0x02]));
        master.poll();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
        assert!(master.is_idle());
    }

    #[test]
    fn test_garbage_before_response_is_survived() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut master = ModbusMaster::new(transport.clone(), MasterConfig::new(10)).unwrap();

        master
            .read_03(0x06, 0x0000, 2, 100, recording_handler(log.clone()))
            .unwrap();
        master.poll();

        transport.feed(&[0xFF, 0xFF]);
        transport.feed(&with_crc(&[0x06, 0x03, 0x04, 0x00, 0x11, 0x00, 0x22]));
        master.poll();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0], (vec![0x00, 0x11, 0x00, 0x22], 0, false));
    }

    #[test]
    fn test_response_before_transmission_is_rejected() {
        let transport = ScriptedTransport::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let config = MasterConfig::new(10).without_retries();
        let mut master = ModbusMaster::new(transport.clone(), config).unwrap();

        // A stale frame arrives while the engine is idle, then a request is
        // queued: the stale frame must not complete it.
        transport.feed(&with_crc(&[0x06, 0x03, 0x04, 0xDE, 0xAD, 0xBE, 0xEF]));
        master.poll();

        master
            .read_03(0x06, 0x0000, 2, 30, recording_handler(log.clone()))
            .unwrap();
        for _ in 0..10 {
            master.poll();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].2, "stale frame must not complete the request");
    }
}
