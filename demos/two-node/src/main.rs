//! Two mailbox engines wired back-to-back through the in-process radio.
//!
//! A "hub" (think Pi) and a "leaf" (think microcontroller) share a three-entry table: the
//! leaf publishes a heartbeat counter every turn and a sensor reading every fifth turn, the
//! hub pushes an event-driven LED command the other way. The loop shuttles frames between
//! the two simulated radios at the reference 2 Hz cadence and the engines' own trace lines
//! show what goes over the air.

use chirp::mailbox::{Direction, Entry, Mailbox, Rate, Value};
use chirp::radio::sim::SimRadio;
use chirp::{ModuleId, Modules};
use log::{LevelFilter, Metadata, Record};
use std::thread;
use std::time::Duration;

const HUB: ModuleId = ModuleId::new(0);
const LEAF: ModuleId = ModuleId::new(1);

struct Console;

impl log::Log for Console {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        println!("[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static CONSOLE: Console = Console;

fn table(local: ModuleId) -> [Entry; 3] {
    let dir = |source| if source == local { Direction::Tx } else { Direction::Rx };
    [
        Entry::new(Value::Int32(0), Rate::every(1), dir(LEAF), LEAF, HUB),
        Entry::new(Value::Float32(0.0), Rate::every(5), dir(LEAF), LEAF, HUB),
        Entry::new(Value::Bool(false), Rate::Async, dir(HUB), HUB, LEAF),
    ]
}

fn main() {
    log::set_logger(&CONSOLE).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let modules = Modules::new(2);
    let mut hub_table = table(HUB);
    let mut leaf_table = table(LEAF);
    let mut hub = Mailbox::new(SimRadio::new(), HUB, modules, &mut hub_table);
    let mut leaf = Mailbox::new(SimRadio::new(), LEAF, modules, &mut leaf_table);
    hub.init().unwrap();
    leaf.init().unwrap();

    let mut beats = 0;
    let mut reading = 20.0f32;
    loop {
        beats += 1;
        reading += 0.25;
        leaf.set(0, Value::Int32(beats)).unwrap();
        leaf.set(1, Value::Float32(reading)).unwrap();
        if beats % 4 == 0 {
            hub.set(2, Value::Bool(beats % 8 == 0)).unwrap();
        }

        hub.tick();
        leaf.tick();

        for frame in hub.radio_mut().take_sent() {
            leaf.radio_mut().inject(&frame).unwrap();
        }
        for frame in leaf.radio_mut().take_sent() {
            hub.radio_mut().inject(&frame).unwrap();
        }

        if leaf.flag(2).unwrap() {
            log::info!("leaf LED command: {:?}", leaf.get(2).unwrap());
            leaf.clear_flag(2).unwrap();
        }

        thread::sleep(Duration::from_millis(500));
    }
}
