//! Blocking event pump binding a [`Session`] to a [`Port`].
//!
//! The pump reads whatever the module sends, samples CTS while the session
//! is polling for bootloader entrance, and carries out the session's
//! effects in the order they were produced. Every transmitted frame is
//! written and flushed in full before its write completion is fed back.
//! The short port timeout also bounds writes, so a write that times out
//! while hardware flow control holds the line is retried, not failed.

use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::FirmwareSource;
use crate::port::Port;
#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};
use crate::session::{Effect, Event, Outcome, Report, Session, UpgradePrompt};

/// Size of a single read from the port.
const READ_CHUNK: usize = 256;

/// Longest read timeout the pump tolerates between poll checks.
const MAX_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Receives the session's notifications.
pub trait Reporter {
    /// A human-readable progress message.
    fn log(&mut self, _message: &str) {}

    /// Per-packet transfer activity.
    fn detail(&mut self, _message: &str) {}

    /// Transfer progress, 0 to 100.
    fn progress(&mut self, _percent: u8) {}

    /// The modem's firmware version was read.
    fn version_discovered(&mut self, _version: &str) {}

    /// The session failed. Called once, after the port is closed.
    fn error(&mut self, _error: &Error) {}

    /// The update was accepted by the module.
    fn completed(&mut self, _elapsed: Duration) {}

    /// Whether to flash an image not tagged for the running firmware.
    /// Declines unless overridden.
    fn confirm_upgrade(&mut self, _prompt: &UpgradePrompt) -> bool {
        false
    }
}

/// Reporter forwarding everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn log(&mut self, message: &str) {
        info!("{message}");
    }

    fn detail(&mut self, message: &str) {
        debug!("{message}");
    }

    fn progress(&mut self, percent: u8) {
        debug!("Progress: {percent}%");
    }

    fn version_discovered(&mut self, version: &str) {
        info!("Firmware version: {version}");
    }

    fn error(&mut self, error: &Error) {
        log::error!("{error}");
    }

    fn completed(&mut self, elapsed: Duration) {
        info!("Completed in {:.1}s", elapsed.as_secs_f64());
    }
}

/// Drives sessions over an open port.
pub struct Updater<P: Port> {
    port: P,
    interrupted: fn() -> bool,
}

#[cfg(feature = "native")]
impl Updater<NativePort> {
    /// Open the serial port described by `config`.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        info!("Opening {} at {} baud", config.port_name, config.baud_rate);
        Ok(Self::new(NativePort::open(config)?))
    }
}

impl<P: Port> Updater<P> {
    /// Wrap an already open port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Replace the interruption check consulted between reads.
    #[must_use]
    pub fn with_interrupt_check(mut self, check: fn() -> bool) -> Self {
        self.interrupted = check;
        self
    }

    /// The underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the updater, returning the port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Run `session` to completion.
    ///
    /// The port is closed when the session finishes or fails. Failures are
    /// reported to `reporter` once and returned.
    pub fn run<S: FirmwareSource>(
        &mut self,
        mut session: Session<S>,
        reporter: &mut dyn Reporter,
    ) -> Result<Outcome> {
        info!("Running {} on {}", session.mode(), self.port.name());
        let result = self.pump(&mut session, reporter);

        if let Err(err) = self.port.close() {
            warn!("Failed to close {}: {err}", self.port.name());
        }
        if let Err(err) = &result {
            reporter.error(err);
        }
        result
    }

    fn pump<S: FirmwareSource>(
        &mut self,
        session: &mut Session<S>,
        reporter: &mut dyn Reporter,
    ) -> Result<Outcome> {
        if self.port.timeout() > MAX_READ_TIMEOUT {
            self.port
                .set_timeout(MAX_READ_TIMEOUT)?;
        }
        self.port
            .clear_buffers()?;

        let interval = session
            .config()
            .poll_interval;
        let mut queue: VecDeque<Effect> = session
            .start()
            .into();
        let mut next_tick: Option<Instant> = None;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            while let Some(effect) = queue.pop_front() {
                match effect {
                    Effect::Transmit(bytes) => {
                        trace!("TX {} bytes", bytes.len());
                        self.send_frame(&bytes)?;
                        queue.extend(session.handle(Event::WriteCompleted(bytes.len())));
                    },
                    Effect::Report(report) => dispatch(reporter, report),
                    Effect::Confirm(prompt) => {
                        let accepted = reporter.confirm_upgrade(&prompt);
                        queue.extend(session.handle(Event::Confirmation(accepted)));
                    },
                    Effect::StartPoller => {
                        debug!("Polling CTS every {interval:?}");
                        next_tick = Some(Instant::now() + interval);
                    },
                    Effect::StopPoller => next_tick = None,
                    Effect::Finish(outcome) => return Ok(outcome),
                    Effect::Fail(err) => return Err(err),
                }
            }

            self.check_interrupt()?;

            match self.port.read(&mut buf) {
                Ok(0) => {},
                Ok(n) => {
                    trace!("RX {n} bytes");
                    queue.extend(session.handle(Event::BytesReceived(buf[..n].to_vec())));
                },
                Err(e) if is_timeout(&e) => {},
                Err(e) => return Err(e.into()),
            }

            if let Some(deadline) = next_tick {
                if Instant::now() >= deadline {
                    let status_signal = self
                        .port
                        .read_cts()?;
                    next_tick = Some(deadline + interval);
                    queue.extend(session.handle(Event::TimerTick { status_signal }));
                }
            }
        }
    }
}

impl<P: Port> Updater<P> {
    /// Write and flush a whole frame, retrying timed out attempts until it
    /// is out or the user interrupts.
    fn send_frame(&mut self, bytes: &[u8]) -> Result<()> {
        let mut sent = 0;
        while sent < bytes.len() {
            match self.port.write(&bytes[sent..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => sent += n,
                Err(e) if is_timeout(&e) => {
                    self.check_interrupt()?;
                    trace!("Write stalled after {sent} of {} bytes", bytes.len());
                },
                Err(e) => return Err(e.into()),
            }
        }

        loop {
            match self.port.flush() {
                Ok(()) => return Ok(()),
                Err(e) if is_timeout(&e) => self.check_interrupt()?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn check_interrupt(&self) -> Result<()> {
        if (self.interrupted)() {
            warn!("Interrupted by user");
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Errors that only mean the port was not ready in time.
fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

fn dispatch(reporter: &mut dyn Reporter, report: Report) {
    match report {
        Report::Log(message) => reporter.log(&message),
        Report::Detail(message) => reporter.detail(&message),
        Report::Progress(percent) => reporter.progress(percent),
        Report::VersionDiscovered(version) => reporter.version_discovered(&version),
        Report::Completed { elapsed } => reporter.completed(elapsed),
    }
}
