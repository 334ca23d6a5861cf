//! Log output via USB CDC.
//!
//! Implements the `log` facade on top of a byte pipe that a writer task
//! drains to the CDC-ACM console. Logging never blocks: lines are truncated
//! to [`MAX_LOG_LINE`] and dropped when the pipe is full.

use core::fmt::Write as _;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::pipe::Pipe;
use embedded_io_async::Write;
use heapless::String;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::config::usb::{LOG_PIPE_SIZE, MAX_LOG_LINE};

/// Formatted log bytes waiting for the console
static LOG_PIPE: Pipe<CriticalSectionRawMutex, LOG_PIPE_SIZE> = Pipe::new();

static LOGGER: PipeLogger = PipeLogger;

struct PipeLogger;

impl Log for PipeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line: String<MAX_LOG_LINE> = String::new();
        // Overflow truncates the line
        let _ = write!(line, "[{}] {}", record.level(), record.args());
        push_bytes(line.as_bytes());
        push_bytes(b"\r\n");
    }

    fn flush(&self) {}
}

/// Write as much of `bytes` as fits, dropping the rest
fn push_bytes(mut bytes: &[u8]) {
    while !bytes.is_empty() {
        let Ok(n) = LOG_PIPE.try_write(bytes) else {
            return;
        };
        bytes = &bytes[n..];
    }
}

/// Initialise the logger.
///
/// Must be called once during startup, before the first log line.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Drain buffered log output to the console.
///
/// The writer is expected to wait for the host (DTR) itself; write errors
/// are ignored since the port may go away at any time.
pub async fn log_writer_task<W: Write>(mut writer: W) -> ! {
    let mut buf = [0u8; 64];
    loop {
        let n = LOG_PIPE.read(&mut buf).await;
        let _ = writer.write_all(&buf[..n]).await;
    }
}
