//! Asynchronous USB traffic dump.
//!
//! The receive and send paths hand buffers over an unbounded channel to a
//! dedicated I/O thread, so logging can never apply back-pressure to the
//! pipeline. One record per buffer:
//!
//! ```text
//! [USB RECV 2026-08-01T10:15:00.123Z] 6 bytes
//! 0000  48 65 6C 6C 6F 0A                                 |Hello.|
//! ```
//!
//! Closing flushes pending records and appends a session footer.

use chrono::{SecondsFormat, Utc};
use cogterm_util::hexdump::dump_lines;
use crossbeam_channel::{Sender, unbounded};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::thread::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Recv,
    Send,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Recv => "RECV",
            Direction::Send => "SEND",
        }
    }
}

enum LogCmd {
    Record {
        dir: Direction,
        stamp: String,
        bytes: Vec<u8>,
    },
    Shutdown,
}

pub struct UsbTrafficLogger {
    tx: Sender<LogCmd>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

impl UsbTrafficLogger {
    /// Opens `path` for append and starts the I/O thread.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = unbounded();

        let handle = std::thread::Builder::new()
            .name("usb-dump".into())
            .spawn(move || {
                let mut out = BufWriter::new(file);
                let mut lines = Vec::new();
                for cmd in rx {
                    match cmd {
                        LogCmd::Record { dir, stamp, bytes } => {
                            let _ = writeln!(
                                out,
                                "[USB {} {}] {} bytes",
                                dir.as_str(),
                                stamp,
                                bytes.len()
                            );
                            lines.clear();
                            dump_lines(&bytes, &mut lines);
                            for line in &lines {
                                let _ = writeln!(out, "{line}");
                            }
                        }
                        LogCmd::Shutdown => break,
                    }
                }
                let _ = writeln!(out, "[USB SESSION END {}]", iso_now());
                let _ = out.flush();
            })?;

        Ok(Self {
            tx,
            io_thread: Mutex::new(Some(handle)),
        })
    }

    /// Queues one buffer for dumping. The timestamp is taken here, at the
    /// moment the traffic was seen, not when the I/O thread gets to it.
    pub fn log(&self, dir: Direction, bytes: &[u8]) {
        let record = LogCmd::Record {
            dir,
            stamp: iso_now(),
            bytes: bytes.to_vec(),
        };
        if self.tx.send(record).is_err() {
            warn!("usb dump thread gone, record lost");
        }
    }

    /// Flushes trailing records, writes the session footer and joins the
    /// I/O thread. Idempotent.
    pub fn close(&self) {
        let _ = self.tx.send(LogCmd::Shutdown);
        if let Some(handle) = self
            .io_thread
            .lock()
            .expect("usb log join handle poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for UsbTrafficLogger {
    fn drop(&mut self) {
        self.close();
    }
}

fn iso_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
