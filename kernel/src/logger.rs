//! `log` crate facade wired to the serial sink.
//!
//! Every subsystem logs through `log::{info,warn,error,debug,trace}` rather
//! than calling `println!` directly, so that log level filtering and a
//! future structured sink are a one-line change away from this module.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::println!("[{:<5} {}] {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the global logger. Must be called once during boot, after
/// `serial::init`.
pub fn init() {
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(LevelFilter::Info))
        .expect("logger must only be installed once");
}
