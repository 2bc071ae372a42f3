//! Voltage RTU Demo
//!
//! Demonstrates the voltage_rtu library features including:
//! - RTU frame building and CRC-16 validation
//! - A master and a slave wired back-to-back through an in-memory link
//! - The cooperative tick scheduler driving both poll loops
//!
//! Usage: cargo run --bin demo

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use voltage_rtu::{
    crc16, Direction, MasterConfig, ModbusMaster, ModbusResult, ModbusSlave, PduBuilder,
    RegisterBlock, RtuTransport, TickScheduler,
};

/// One half of an in-memory serial link
///
/// Bytes written on one side appear on the other side's read path, the way
/// two UARTs face each other over a cable.
struct WireTransport {
    rx: Arc<Mutex<VecDeque<u8>>>,
    tx: Arc<Mutex<VecDeque<u8>>>,
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

    fn dir_ctrl(&mut self, _dir: Direction) {
        // A real RS-485 board toggles the driver-enable pin here, typically
        // deferring the TX->RX switch until the last bit is on the wire.
    }
}

fn wire_pair() -> (WireTransport, WireTransport) {
    let a_to_b = Arc::new(Mutex::new(VecDeque::new()));
    let b_to_a = Arc::new(Mutex::new(VecDeque::new()));
    (
        WireTransport {
            rx: b_to_a.clone(),
            tx: a_to_b.clone(),
        },
        WireTransport {
            rx: a_to_b,
            tx: b_to_a,
        },
    )
}

fn main() -> ModbusResult<()> {
    voltage_rtu::logging::init("info")?;

    println!("🚀 {}", voltage_rtu::info());
    println!("=============================\n");

    // =========================================================================
    // Part 1: Frame building and CRC (no link required)
    // =========================================================================
    println!("📦 Part 1: RTU Frames and CRC-16");
    println!("---------------------------------");

    let read_req = PduBuilder::build_read_request(0x06, 0x0000, 2)?;
    println!("  FC03 request:  {:02X?}", read_req.as_slice());

    let write_req = PduBuilder::build_write_request(0x06, 0x0010, &[0x00AA, 0x00BB])?;
    println!("  FC16 request:  {:02X?}", write_req.as_slice());

    let body = &read_req.as_slice()[..read_req.len() - 2];
    println!("  CRC over body: 0x{:04X} (transmitted low byte first)\n", crc16(body));

    // =========================================================================
    // Part 2: Master/slave loopback under the tick scheduler
    // =========================================================================
    println!("🔌 Part 2: Poll-Driven Master/Slave Exchange");
    println!("---------------------------------------------");

    let (master_wire, slave_wire) = wire_pair();

    // Slave 0x06 exposes 16 holding registers at 0x0000.
    let registers = Arc::new(Mutex::new([0u16; 16]));
    let store = registers.clone();
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

    let period_ms = 10;
    let master = Arc::new(Mutex::new(ModbusMaster::new(
        master_wire,
        MasterConfig::new(period_ms),
    )?));
    let slave = Arc::new(Mutex::new(ModbusSlave::new(slave_wire, 0x06, blocks)?));

    // Write two registers, then read them back.
    master.lock().unwrap().write_10(
        0x06,
        0x0000,
        &[0x1234, 0x5678],
        100,
        Some(Box::new(|_, err, timed_out| {
            println!("  write complete: err=0x{:02X} timed_out={}", err, timed_out);
        })),
    )?;
    master.lock().unwrap().read_03(
        0x06,
        0x0000,
        2,
        100,
        Box::new(|data, err, timed_out| {
            println!(
                "  read complete:  data={:02X?} err=0x{:02X} timed_out={}",
                data, err, timed_out
            );
        }),
    )?;
    // Out-of-table read: answered with exception 0x02.
    master.lock().unwrap().read_03(
        0x06,
        0x0100,
        1,
        100,
        Box::new(|_, err, timed_out| {
            println!("  bad read:       err=0x{:02X} timed_out={}", err, timed_out);
        }),
    )?;

    let mut scheduler = TickScheduler::new(period_ms)?;
    {
        let master = master.clone();
        scheduler.register(None, Some(Box::new(move || master.lock().unwrap().poll())), period_ms)?;
    }
    {
        let slave = slave.clone();
        scheduler.register(None, Some(Box::new(move || slave.lock().unwrap().poll())), period_ms)?;
    }
    scheduler.start();

    for _ in 0..1000 {
        if master.lock().unwrap().is_idle() {
            break;
        }
        scheduler.tick();
    }

    let stats = master.lock().unwrap().stats();
    println!("\n📊 Master statistics:");
    println!("  requests sent:      {}", stats.requests_sent);
    println!("  responses received: {}", stats.responses_received);
    println!("  timeouts:           {}", stats.timeouts);
    println!("  bytes sent/recv:    {}/{}", stats.bytes_sent, stats.bytes_received);
    println!("  registers now:      {:04X?}", &registers.lock().unwrap()[..4]);

    println!("\n✅ Demo completed");
    Ok(())
}
