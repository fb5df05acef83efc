use cogbus_events::BacktickKind;
use cogterm_config::{ResetLine, TermConfig};
use cogterm_core::{Destination, LoggerSink, Processor, SerialLink, TerminalSink};
use crossbeam_channel::unbounded;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct PortLink(Mutex<Box<dyn SerialPort>>);

impl SerialLink for PortLink {
    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.0.lock().expect("serial writer").write_all(bytes)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/cogterm.toml".to_string());
    let config = TermConfig::load(&config_path).unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let mut port = serialport::new(&config.serial.port, config.serial.baud)
        .timeout(Duration::from_millis(10))
        .open()?;
    info!(
        port = %config.serial.port,
        baud = config.serial.baud,
        "serial port open"
    );

    let writer = PortLink(Mutex::new(port.try_clone()?));
    let processor = Arc::new(Processor::new(&config, Arc::new(writer))?);

    // Terminal text goes straight to stdout; window commands and debugger
    // blocks get the diagnostic logger (rendering lives elsewhere).
    let (term_tx, term_rx) = unbounded();
    let terminal: Arc<dyn Destination> = Arc::new(TerminalSink::new(term_tx));
    let logger: Arc<dyn Destination> = Arc::new(LoggerSink);
    let window_creator = |_kind: BacktickKind| -> Arc<dyn Destination> { Arc::new(LoggerSink) };
    processor.apply_standard_routing(Some(logger), &window_creator, terminal, None, None);

    std::thread::spawn(move || {
        let stdout = io::stdout();
        for msg in term_rx {
            let mut out = stdout.lock();
            let _ = out.write_all(&msg.payload);
            let _ = out.flush();
        }
    });

    processor.start()?;

    // Pulse the configured control line so the target boots from a known
    // state, and record the boundary on the matching reset hook.
    match config.serial.reset_line {
        ResetLine::Dtr => {
            port.write_data_terminal_ready(true)?;
            std::thread::sleep(Duration::from_millis(10));
            port.write_data_terminal_ready(false)?;
            processor.on_dtr_reset();
        }
        ResetLine::Rts => {
            port.write_request_to_send(true)?;
            std::thread::sleep(Duration::from_millis(10));
            port.write_request_to_send(false)?;
            processor.on_rts_reset();
        }
    }

    let mut buf = [0u8; 4096];
    let mut last_report = Instant::now();
    loop {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => processor.receive_data(&buf[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(e) => {
                eprintln!("COGTERM: serial read failed: {e}");
                break;
            }
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = processor.stats();
            info!(
                bytes = stats.performance.bytes_received,
                routed = stats.router.routed,
                sync = processor.sync_status().synchronized,
                "throughput"
            );
            last_report = Instant::now();
        }
    }

    processor.stop();
    Ok(())
}
