//! Port driver loop
//!
//! Opens the panel's serial port, waits for the panel to come out of reset,
//! then writes every tally/state message in cycle order with a fixed pause
//! after each write. Any open or write failure aborts the run.

use crate::message::{self, Message, CYCLE_LEN};
use crate::serial::{PortConfig, SerialConnection};
use chrono::Local;
use colored::Colorize;
use log::{debug, info};
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;

/// Pause between opening the port and the first write
pub const STARTUP_DELAY: Duration = Duration::from_secs(5);

/// Pause after every write
pub const MESSAGE_INTERVAL: Duration = Duration::from_millis(500);

/// Fatal driver errors
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to open serial port {port}")]
    Open {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("failed to write {message} to serial port")]
    Write {
        message: Message,
        #[source]
        source: io::Error,
    },
}

/// Write side of an open connection
pub trait Transport {
    /// Single write attempt, returning the number of bytes accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Opens connections to the panel
pub trait Connector {
    type Transport: Transport;

    fn open(&mut self, config: &PortConfig) -> serialport::Result<Self::Transport>;
}

/// Blocking delay source
pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

/// Connector backed by the `serialport` crate
#[derive(Debug, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Transport = SerialConnection;

    fn open(&mut self, config: &PortConfig) -> serialport::Result<SerialConnection> {
        SerialConnection::open(config)
    }
}

impl Transport for SerialConnection {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        SerialConnection::write(self, data)
    }

    fn flush(&mut self) -> io::Result<()> {
        SerialConnection::flush(self)
    }
}

/// Sleeps the calling thread
#[derive(Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Driver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Connecting,
    Streaming,
    Aborted,
}

/// Configuration for a driver run
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Port to open
    pub port_config: PortConfig,
    /// Stop after this many full cycles (unbounded when `None`)
    pub max_cycles: Option<u64>,
}

impl DriverConfig {
    pub fn new(port_config: PortConfig) -> Self {
        Self {
            port_config,
            max_cycles: None,
        }
    }

    pub fn with_max_cycles(mut self, max_cycles: Option<u64>) -> Self {
        self.max_cycles = max_cycles;
        self
    }
}

/// Totals for a run that ended without error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages_sent: u64,
    pub bytes_written: u64,
}

/// Drives one panel connection
pub struct Driver<S, W> {
    config: DriverConfig,
    sleeper: S,
    out: W,
    state: DriverState,
}

impl<S: Sleeper, W: Write> Driver<S, W> {
    pub fn new(config: DriverConfig, sleeper: S, out: W) -> Self {
        Self {
            config,
            sleeper,
            out,
            state: DriverState::Connecting,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Open the port and stream the cycle until the cycle limit or an error.
    ///
    /// Without a cycle limit this only returns on error.
    pub fn run<C: Connector>(&mut self, connector: &mut C) -> Result<RunSummary, DriverError> {
        let mut transport = self.connect(connector)?;

        let messages: Box<dyn Iterator<Item = Message>> = match self.config.max_cycles {
            Some(cycles) => {
                info!("Sending {} cycle(s) of {} messages", cycles, CYCLE_LEN);
                let total = usize::try_from(cycles)
                    .unwrap_or(usize::MAX)
                    .saturating_mul(CYCLE_LEN);
                Box::new(message::sequence().take(total))
            }
            None => Box::new(message::sequence()),
        };

        self.stream(&mut transport, messages)
    }

    /// Open the port and send a single message
    pub fn send<C: Connector>(
        &mut self,
        connector: &mut C,
        message: Message,
    ) -> Result<RunSummary, DriverError> {
        let mut transport = self.connect(connector)?;
        let summary = self.stream(&mut transport, std::iter::once(message))?;

        if let Err(source) = transport.flush() {
            self.state = DriverState::Aborted;
            return Err(DriverError::Write { message, source });
        }

        Ok(summary)
    }

    fn connect<C: Connector>(&mut self, connector: &mut C) -> Result<C::Transport, DriverError> {
        self.state = DriverState::Connecting;
        let port = self.config.port_config.port_path.clone();
        let baud_rate = self.config.port_config.baud_rate;
        debug!("Opening {} at {} baud", port, baud_rate);

        let transport = match connector.open(&self.config.port_config) {
            Ok(transport) => transport,
            Err(source) => {
                self.state = DriverState::Aborted;
                return Err(DriverError::Open { port, source });
            }
        };

        self.report(format!(
            "{} Connected to {} at {} baud",
            "[OK]".green().bold(),
            port,
            baud_rate
        ));
        self.report(format!(
            "{} Waiting {}s for the panel to initialize",
            "[*]".cyan().bold(),
            STARTUP_DELAY.as_secs()
        ));
        self.sleeper.sleep(STARTUP_DELAY);

        self.state = DriverState::Streaming;
        Ok(transport)
    }

    fn stream<T: Transport>(
        &mut self,
        transport: &mut T,
        messages: impl Iterator<Item = Message>,
    ) -> Result<RunSummary, DriverError> {
        let mut summary = RunSummary::default();

        for message in messages {
            self.report(format!(
                "{} T: {} S: {} Sending: {}",
                "[TX]".cyan().bold(),
                message.tally(),
                message.state(),
                message
            ));

            let written = match transport.write(&message.to_bytes()) {
                Ok(n) => n,
                Err(source) => {
                    self.state = DriverState::Aborted;
                    return Err(DriverError::Write { message, source });
                }
            };

            self.report(format!("{} Wrote {} bytes", "[OK]".green().bold(), written));
            summary.messages_sent += 1;
            summary.bytes_written += written as u64;

            if summary.messages_sent % CYCLE_LEN as u64 == 0 {
                debug!("Completed cycle {}", summary.messages_sent / CYCLE_LEN as u64);
            }

            self.sleeper.sleep(MESSAGE_INTERVAL);
        }

        Ok(summary)
    }

    /// Progress output is best-effort.
    fn report(&mut self, line: String) {
        let timestamp = Local::now().format("%H:%M:%S%.3f");
        let _ = writeln!(self.out, "{} {}", timestamp.to_string().dimmed(), line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Open(String),
        Write(Vec<u8>),
        Flush,
        Sleep(Duration),
    }

    type EventLog = Rc<RefCell<Vec<Event>>>;

    struct MockConnector {
        events: EventLog,
        fail_open: bool,
        /// 1-based write attempt that fails
        fail_write_at: Option<usize>,
        short_write: bool,
    }

    impl MockConnector {
        fn new(events: &EventLog) -> Self {
            Self {
                events: Rc::clone(events),
                fail_open: false,
                fail_write_at: None,
                short_write: false,
            }
        }
    }

    impl Connector for MockConnector {
        type Transport = MockTransport;

        fn open(&mut self, config: &PortConfig) -> serialport::Result<MockTransport> {
            self.events
                .borrow_mut()
                .push(Event::Open(config.port_path.clone()));
            if self.fail_open {
                return Err(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    "no such device",
                ));
            }
            Ok(MockTransport {
                events: Rc::clone(&self.events),
                attempts: 0,
                fail_write_at: self.fail_write_at,
                short_write: self.short_write,
            })
        }
    }

    struct MockTransport {
        events: EventLog,
        attempts: usize,
        fail_write_at: Option<usize>,
        short_write: bool,
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            self.events.borrow_mut().push(Event::Write(data.to_vec()));
            if self.fail_write_at == Some(self.attempts) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            if self.short_write {
                return Ok(data.len() - 1);
            }
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.events.borrow_mut().push(Event::Flush);
            Ok(())
        }
    }

    struct RecordingSleeper(EventLog);

    impl Sleeper for RecordingSleeper {
        fn sleep(&mut self, duration: Duration) {
            self.0.borrow_mut().push(Event::Sleep(duration));
        }
    }

    fn driver(events: &EventLog, max_cycles: Option<u64>) -> Driver<RecordingSleeper, Vec<u8>> {
        let config = DriverConfig::new(PortConfig::new("/dev/tally0")).with_max_cycles(max_cycles);
        Driver::new(config, RecordingSleeper(Rc::clone(events)), Vec::new())
    }

    fn writes(events: &EventLog) -> Vec<Vec<u8>> {
        events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn output(driver: &Driver<RecordingSleeper, Vec<u8>>) -> String {
        String::from_utf8_lossy(&driver.out).to_string()
    }

    #[test]
    fn test_full_cycle_in_order() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        let mut driver = driver(&events, Some(1));

        let summary = driver.run(&mut connector).unwrap();

        assert_eq!(summary.messages_sent, 75);
        assert_eq!(summary.bytes_written, 75 * 4);
        assert_eq!(driver.state(), DriverState::Streaming);

        let expected: Vec<Vec<u8>> = message::Cycle::new().map(|m| m.to_bytes().to_vec()).collect();
        assert_eq!(writes(&events), expected);
    }

    #[test]
    fn test_sequence_restarts_after_cycle() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        let mut driver = driver(&events, Some(2));

        let summary = driver.run(&mut connector).unwrap();
        assert_eq!(summary.messages_sent, 150);

        let sent = writes(&events);
        assert_eq!(sent[75], b"Q10W".to_vec());
        assert_eq!(sent[..75], sent[75..]);
    }

    #[test]
    fn test_reports_bytes_written() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        let mut driver = driver(&events, Some(1));

        driver.run(&mut connector).unwrap();

        let out = output(&driver);
        assert_eq!(out.matches("Wrote 4 bytes").count(), 75);
        assert!(out.contains("T: 1 S: 0 Sending: Q10W"));
        assert!(out.contains("T: F S: 4 Sending: QF4W"));
        assert!(out.contains("Connected to /dev/tally0 at 115200 baud"));
    }

    #[test]
    fn test_short_write_is_reported_not_retried() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        connector.short_write = true;
        let mut driver = driver(&events, Some(1));

        let summary = driver.run(&mut connector).unwrap();

        assert_eq!(writes(&events).len(), 75);
        assert_eq!(summary.bytes_written, 75 * 3);
        assert_eq!(output(&driver).matches("Wrote 3 bytes").count(), 75);
    }

    #[test]
    fn test_open_failure_sends_nothing() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        connector.fail_open = true;
        let mut driver = driver(&events, None);

        let err = driver.run(&mut connector).unwrap_err();

        assert!(matches!(err, DriverError::Open { ref port, .. } if port == "/dev/tally0"));
        assert_eq!(driver.state(), DriverState::Aborted);
        assert_eq!(*events.borrow(), vec![Event::Open("/dev/tally0".to_string())]);
    }

    #[test]
    fn test_write_failure_stops_after_kth_attempt() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        connector.fail_write_at = Some(7);
        // Unbounded: only the failure can end this run.
        let mut driver = driver(&events, None);

        let err = driver.run(&mut connector).unwrap_err();

        match err {
            DriverError::Write { message, .. } => assert_eq!(message.to_string(), "Q21W"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(driver.state(), DriverState::Aborted);
        assert_eq!(writes(&events).len(), 7);
        assert_eq!(output(&driver).matches("Wrote").count(), 6);
        assert_eq!(events.borrow().last(), Some(&Event::Write(b"Q21W".to_vec())));
    }

    #[test]
    fn test_write_failure_on_first_message() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        connector.fail_write_at = Some(1);
        let mut driver = driver(&events, None);

        assert!(driver.run(&mut connector).is_err());
        assert_eq!(writes(&events), vec![b"Q10W".to_vec()]);
    }

    #[test]
    fn test_startup_delay_and_interval() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        let mut driver = driver(&events, Some(1));

        driver.run(&mut connector).unwrap();

        let events = events.borrow();
        assert_eq!(events[0], Event::Open("/dev/tally0".to_string()));
        assert_eq!(events[1], Event::Sleep(STARTUP_DELAY));
        assert_eq!(STARTUP_DELAY, Duration::from_secs(5));

        // After the startup pause, writes and 500ms pauses strictly alternate.
        for pair in events[2..].chunks(2) {
            assert!(matches!(pair[0], Event::Write(_)));
            assert_eq!(pair[1], Event::Sleep(Duration::from_millis(500)));
        }
        assert_eq!(events.len(), 2 + 75 * 2);
    }

    #[test]
    fn test_send_single_message() {
        let events = EventLog::default();
        let mut connector = MockConnector::new(&events);
        let mut driver = driver(&events, None);
        let message = Message::new('B', '3').unwrap();

        let summary = driver.send(&mut connector, message).unwrap();

        assert_eq!(summary.messages_sent, 1);
        assert_eq!(summary.bytes_written, 4);
        assert_eq!(
            *events.borrow(),
            vec![
                Event::Open("/dev/tally0".to_string()),
                Event::Sleep(STARTUP_DELAY),
                Event::Write(b"QB3W".to_vec()),
                Event::Sleep(MESSAGE_INTERVAL),
                Event::Flush,
            ]
        );
    }

    #[test]
    fn test_error_display() {
        let err = DriverError::Write {
            message: Message::at(0),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "gone"),
        };
        assert_eq!(err.to_string(), "failed to write Q10W to serial port");
        assert_eq!(std::error::Error::source(&err).unwrap().to_string(), "gone");
    }
}
