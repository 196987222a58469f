//! Minimal logger for the simulated machine.
//!
//! Formats records into a fixed buffer and forwards them to a pluggable sink
//! function, so the no_std library can log without owning an output device.
//! Tests install a sink that prints to stdout.

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Once;

/// Where formatted log lines go.
pub type Sink = fn(&str);

static SINK: Once<Sink> = Once::new();
static LOGGER: SinkLogger = SinkLogger;

struct SinkLogger;

impl Log for SinkLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.get().is_some()
    }

    fn log(&self, record: &Record) {
        let Some(sink) = SINK.get() else { return };
        // Format: [LEVEL] message
        let level_str = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        let mut buf = [0u8; 512];
        let pos = {
            use core::fmt::Write;
            let mut writer = BufferWriter {
                buffer: &mut buf,
                pos: 0,
            };
            let _ = write!(writer, "[{}] {}", level_str, record.args());
            writer.pos
        };
        if let Ok(line) = core::str::from_utf8(&buf[..pos]) {
            sink(line);
        }
    }

    fn flush(&self) {}
}

/// Buffer writer for formatting without alloc; overflow truncates.
pub struct BufferWriter<'a> {
    pub buffer: &'a mut [u8],
    pub pos: usize,
}

impl<'a> core::fmt::Write for BufferWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = self.buffer.len() - self.pos;
        let to_write = bytes.len().min(remaining);
        self.buffer[self.pos..self.pos + to_write].copy_from_slice(&bytes[..to_write]);
        self.pos += to_write;
        Ok(())
    }
}

/// Install the logger with `sink`. Only the first sink wins; calling again
/// is harmless.
pub fn init(sink: Sink) {
    SINK.call_once(|| sink);
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
}
