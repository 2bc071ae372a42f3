//! End-to-end master/slave exchanges over an in-memory half-duplex link
//!
//! A master and a slave engine face each other through two byte queues, the
//! way two UARTs share a cable. Each test drives both poll loops directly.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use voltage_rtu::{
    Direction, ExceptionCode, MasterConfig, ModbusMaster, ModbusResult, ModbusSlave,
    RegisterBlock, ResponseHandler, RtuTransport,
};

type Wire = Arc<Mutex<VecDeque<u8>>>;

/// One half of an in-memory serial link
struct WireTransport {
    rx: Wire,
    tx: Wire,
}

impl RtuTransport for WireTransport {
    fn init(&mut self) -> ModbusResult<()> {
        Ok(())
    }

    fn read(&mut self, dst: &mut [u8]) -> usize {
        let mut rx = self.rx.lock().unwrap();
        let n = dst.len().min(rx.len());
        for slot in dst.iter_mut().take(n) {
            *slot = rx.pop_front().unwrap();
        }
        n
    }

    fn write(&mut self, src: &[u8]) -> usize {
        self.tx.lock().unwrap().extend(src.iter().copied());
        src.len()
    }

    fn dir_ctrl(&mut self, _dir: Direction) {}
}

/// Build both link ends; returns (master side, slave side, slave->master wire)
fn wire_pair() -> (WireTransport, WireTransport, Wire) {
    let m_to_s: Wire = Arc::new(Mutex::new(VecDeque::new()));
    let s_to_m: Wire = Arc::new(Mutex::new(VecDeque::new()));
    (
        WireTransport {
            rx: s_to_m.clone(),
            tx: m_to_s.clone(),
        },
        WireTransport {
            rx: m_to_s,
            tx: s_to_m.clone(),
        },
        s_to_m,
    )
}

/// Register-store slave covering `[0x0000, 0x0010)`
fn storage_slave(
    transport: WireTransport,
    store: Arc<Mutex<[u16; 16]>>,
) -> ModbusSlave<WireTransport> {
    let blocks = vec![RegisterBlock::new(
        0x0000,
        0x0010,
        Box::new(move |function, reg, _count, regs| {
            let mut store = store.lock().unwrap();
            let base = reg as usize;
            match function {
                0x03 => {
                    for (i, slot) in regs.iter_mut().enumerate() {
                        *slot = store[base + i];
                    }
                }
                _ => {
                    for (i, &value) in regs.iter().enumerate() {
                        store[base + i] = value;
                    }
                }
            }
            Ok(())
        }),
    )];
    ModbusSlave::new(transport, 0x06, blocks).unwrap()
}

fn run_until_idle(master: &mut ModbusMaster<WireTransport>, slave: &mut ModbusSlave<WireTransport>) {
    for _ in 0..1000 {
        if master.is_idle() {
            return;
        }
        master.poll();
        slave.poll();
    }
    panic!("engines did not settle within 1000 ticks");
}

type Outcome = (Vec<u8>, u8, bool);

fn recording_handler(log: Arc<Mutex<Vec<Outcome>>>) -> ResponseHandler {
    Box::new(move |data, err, timed_out| {
        log.lock().unwrap().push((data.to_vec(), err, timed_out));
    })
}

#[test]
fn read_exchange_end_to_end() {
    let (master_wire, slave_wire, _) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));
    store.lock().unwrap()[0] = 0x0011;
    store.lock().unwrap()[1] = 0x0022;

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = storage_slave(slave_wire, store);

    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .read_03(0x06, 0x0000, 2, 100, recording_handler(log.clone()))
        .unwrap();
    run_until_idle(&mut master, &mut slave);

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(vec![0x00, 0x11, 0x00, 0x22], 0, false)]);
    drop(log);
    assert_eq!(master.stats().responses_received, 1);
    assert_eq!(master.stats().timeouts, 0);
    assert!(master.send_permit());
}

#[test]
fn write_then_read_back() {
    let (master_wire, slave_wire, _) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = storage_slave(slave_wire, store.clone());

    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .write_10(
            0x06,
            0x0004,
            &[0x00AA, 0x00BB],
            100,
            Some(recording_handler(log.clone())),
        )
        .unwrap();
    master
        .read_03(0x06, 0x0004, 2, 100, recording_handler(log.clone()))
        .unwrap();
    run_until_idle(&mut master, &mut slave);

    assert_eq!(store.lock().unwrap()[4..6], [0x00AA, 0x00BB]);
    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], (vec![], 0, false));
    assert_eq!(log[1], (vec![0x00, 0xAA, 0x00, 0xBB], 0, false));
}

#[test]
fn silent_peer_times_out_exactly_once() {
    // No slave on the wire at all.
    let (master_wire, _slave_wire, _) = wire_pair();
    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .read_03(0x06, 0x0000, 2, 30, recording_handler(log.clone()))
        .unwrap();
    for _ in 0..50 {
        master.poll();
    }

    // Default retry policy: three attempts, one final timeout callback.
    assert_eq!(master.stats().requests_sent, 3);
    assert_eq!(master.stats().timeouts, 1);
    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(vec![], 0, true)]);
    drop(log);
    assert!(master.is_idle());
    assert!(master.send_permit());
}

#[test]
fn out_of_table_read_yields_illegal_data_address() {
    let (master_wire, slave_wire, _) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = storage_slave(slave_wire, store);

    // 0x000F + 2 registers is not fully contained in [0x0000, 0x0010).
    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .read_03(0x06, 0x000F, 2, 100, recording_handler(log.clone()))
        .unwrap();
    run_until_idle(&mut master, &mut slave);

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(vec![], 0x02, false)]);
}

#[test]
fn handler_exception_reaches_master_callback() {
    let (master_wire, slave_wire, _) = wire_pair();
    let blocks = vec![RegisterBlock::new(
        0x0000,
        0x0010,
        Box::new(|_, _, _, _| Err(ExceptionCode::SlaveDeviceBusy)),
    )];

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = ModbusSlave::new(slave_wire, 0x06, blocks).unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .read_03(0x06, 0x0000, 1, 100, recording_handler(log.clone()))
        .unwrap();
    run_until_idle(&mut master, &mut slave);

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(vec![], 0x06, false)]);
}

#[test]
fn line_noise_before_response_is_survived() {
    let (master_wire, slave_wire, s_to_m) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));
    store.lock().unwrap()[0] = 0x0011;
    store.lock().unwrap()[1] = 0x0022;

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = storage_slave(slave_wire, store);

    let log = Arc::new(Mutex::new(Vec::new()));
    master
        .read_03(0x06, 0x0000, 2, 100, recording_handler(log.clone()))
        .unwrap();

    // Transmit, then corrupt the line with two garbage bytes before the
    // slave gets to answer.
    master.poll();
    s_to_m.lock().unwrap().extend([0xFF, 0xFF]);
    run_until_idle(&mut master, &mut slave);

    let log = log.lock().unwrap();
    assert_eq!(*log, vec![(vec![0x00, 0x11, 0x00, 0x22], 0, false)]);
    drop(log);
    assert_eq!(master.stats().timeouts, 0);
}

#[test]
fn queued_requests_complete_in_fifo_order() {
    let (master_wire, slave_wire, _) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));
    for (i, slot) in store.lock().unwrap().iter_mut().enumerate() {
        *slot = i as u16;
    }

    let mut master = ModbusMaster::new(master_wire, MasterConfig::new(10)).unwrap();
    let mut slave = storage_slave(slave_wire, store);

    let order = Arc::new(Mutex::new(Vec::new()));
    for reg in [3u16, 7, 11] {
        let order = order.clone();
        master
            .read_03(
                0x06,
                reg,
                1,
                100,
                Box::new(move |data, _, _| {
                    order.lock().unwrap().push(data.to_vec());
                }),
            )
            .unwrap();
    }
    run_until_idle(&mut master, &mut slave);

    assert_eq!(
        *order.lock().unwrap(),
        vec![vec![0x00, 3], vec![0x00, 7], vec![0x00, 11]]
    );
    assert_eq!(master.stats().requests_sent, 3);
    assert_eq!(master.stats().responses_received, 3);
}

#[test]
fn timed_out_request_does_not_block_the_next() {
    let (master_wire, slave_wire, _) = wire_pair();
    let store = Arc::new(Mutex::new([0u16; 16]));

    let mut master = ModbusMaster::new(
        master_wire,
        MasterConfig::new(10).without_retries(),
    )
    .unwrap();
    let mut slave = storage_slave(slave_wire, store);

    let log = Arc::new(Mutex::new(Vec::new()));
    // First request targets a station that is not on this wire.
    master
        .read_03(0x09, 0x0000, 1, 30, recording_handler(log.clone()))
        .unwrap();
    master
        .read_03(0x06, 0x0000, 1, 100, recording_handler(log.clone()))
        .unwrap();
    run_until_idle(&mut master, &mut slave);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0], (vec![], 0, true));
    assert_eq!(log[1], (vec![0x00, 0x00], 0, false));
}
