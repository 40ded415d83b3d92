//! Firmware update session state machine.
//!
//! A [`Session`] never touches the serial port. The caller feeds it
//! [`Event`]s (received bytes, write completions, poll ticks, the user's
//! answer to a confirmation prompt) and carries out the [`Effect`]s it
//! returns, in order. [`crate::updater::Updater`] is the blocking pump that
//! does this against a real [`Port`](crate::port::Port).
//!
//! A session walks through three phases:
//!
//! 1. **Mode detection.** `ATI3` is sent and the reply tells whether the
//!    bootloader, the modem or the user application is listening. The
//!    bootloader is unlocked and bridged to the modem; the user application
//!    is told to reboot into the bootloader, which is then detected by
//!    polling CTS.
//! 2. **Version gate.** Once the modem reports its firmware version the
//!    session either stops ([`SessionMode::Query`]), asks for confirmation
//!    when the image was not built for that version
//!    ([`SessionMode::ModeCheckBeforeUpdate`]), or goes straight on.
//! 3. **Transfer.** `AT+WDSD` announces the image, which is then streamed
//!    with XModem-1K and accepted with `AT+WDSR=4`.

pub mod buffer;
pub mod completion;
pub mod detect;
pub mod poller;
pub mod transfer;

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::{FirmwareImage, FirmwareSource, MemoryImage, OpenImage};
use crate::protocol::Command;
use crate::protocol::command::WAKEUP_RESPONSE_MIN_LEN;
use buffer::ReceiveBuffer;
use completion::CompletionMonitor;
use detect::{Classification, classify};
use poller::{BootloaderPoller, PollResult};
use transfer::{Step, TransferState, XmodemSender};

/// Default interval between bootloader entrance checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Default number of bootloader entrance checks.
pub const DEFAULT_MAX_POLL_TICKS: u8 = 5;

/// What the session was started to do. Fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Detect the module, then transfer the image without a version check.
    FirmwareUpdate,
    /// Detect the module and report its firmware version.
    Query,
    /// Detect the module, check the image was built for its version, then
    /// transfer.
    ModeCheckBeforeUpdate,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FirmwareUpdate => write!(f, "firmware update"),
            Self::Query => write!(f, "version query"),
            Self::ModeCheckBeforeUpdate => write!(f, "checked firmware update"),
        }
    }
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between bootloader entrance checks.
    pub poll_interval: Duration,
    /// Checks before giving up on bootloader entrance.
    pub max_poll_ticks: u8,
    /// Consecutive retransmissions of one packet before failing.
    /// `None` retransmits for as long as the module keeps answering NAK.
    pub max_nack_retries: Option<u32>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_ticks: DEFAULT_MAX_POLL_TICKS,
            max_nack_retries: None,
        }
    }
}

impl SessionConfig {
    /// Set the bootloader entrance poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the number of bootloader entrance checks.
    #[must_use]
    pub fn with_max_poll_ticks(mut self, ticks: u8) -> Self {
        self.max_poll_ticks = ticks;
        self
    }

    /// Cap retransmissions of a rejected packet.
    #[must_use]
    pub fn with_max_nack_retries(mut self, retries: Option<u32>) -> Self {
        self.max_nack_retries = retries;
        self
    }
}

/// Input to [`Session::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Bytes arrived from the module.
    BytesReceived(Vec<u8>),
    /// The transport finished writing this many bytes.
    WriteCompleted(usize),
    /// The bootloader poll interval elapsed; carries the sampled CTS line.
    TimerTick {
        /// Whether CTS is asserted.
        status_signal: bool,
    },
    /// The answer to an [`Effect::Confirm`] prompt.
    Confirmation(bool),
}

/// Caller-visible notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Report {
    /// Human-readable progress message.
    Log(String),
    /// Per-packet transfer activity. High volume; show it when verbose.
    Detail(String),
    /// Transfer progress, 0 to 100.
    Progress(u8),
    /// The modem reported its firmware version.
    VersionDiscovered(String),
    /// The update was accepted by the module.
    Completed {
        /// Time since the session started.
        elapsed: Duration,
    },
}

/// Asked when the image was not built for the running firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePrompt {
    /// Firmware version the modem reported.
    pub version: String,
    /// Display name of the image.
    pub image: String,
}

impl fmt::Display for UpgradePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The firmware update file '{}' does not appear to be for firmware version {}. \
             Proceed with the update anyway?",
            self.image, self.version
        )
    }
}

/// How a session ended successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Query finished with the modem's firmware version.
    Version(String),
    /// The user declined the update.
    Declined,
    /// The image was transferred and accepted.
    Updated {
        /// Time since the session started.
        elapsed: Duration,
    },
}

/// Output of [`Session::handle`], to be carried out in order.
#[derive(Debug)]
pub enum Effect {
    /// Write these bytes to the module.
    Transmit(Vec<u8>),
    /// Notify the caller.
    Report(Report),
    /// Ask the caller to confirm the update, then send back
    /// [`Event::Confirmation`].
    Confirm(UpgradePrompt),
    /// Start delivering [`Event::TimerTick`] every poll interval.
    StartPoller,
    /// Stop delivering ticks.
    StopPoller,
    /// The session is done; close the port.
    Finish(Outcome),
    /// The session failed; close the port.
    Fail(Error),
}

/// Coarse view of what the session is doing, for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Waiting for the module to answer `ATI3`.
    Modem,
    /// Bootloader unlocked, UART bridge not yet requested.
    BootloaderUnbridged,
    /// Bridge requested, waiting for the modem to wake up.
    BootloaderBridged,
    /// User application told to reboot, polling CTS.
    UserApplication,
    /// Waiting for [`Event::Confirmation`].
    AwaitingConfirmation,
    /// Streaming the image.
    Transfer(TransferState),
    /// Finished or failed.
    Done,
}

enum Action<R> {
    Modem,
    BootloaderUnbridged,
    BootloaderBridged,
    UserApplication,
    AwaitingConfirmation,
    Transfer(XmodemSender<R>),
    Done,
}

/// One firmware update or version query.
pub struct Session<S: FirmwareSource = FirmwareImage> {
    mode: SessionMode,
    config: SessionConfig,
    source: S,
    action: Action<S::Reader>,
    buffer: ReceiveBuffer,
    poller: BootloaderPoller,
    completion: CompletionMonitor,
    started: Option<Instant>,
    version: Option<String>,
}

impl Session<MemoryImage> {
    /// Create a [`SessionMode::Query`] session. Queries never open an image.
    pub fn query(config: SessionConfig) -> Self {
        Self::new(SessionMode::Query, MemoryImage::new("", Vec::new()), config)
    }
}

impl<S: FirmwareSource> Session<S> {
    /// Create a session that will update from (or, for queries, ignore)
    /// `source`.
    pub fn new(mode: SessionMode, source: S, config: SessionConfig) -> Self {
        let poller = BootloaderPoller::new(config.max_poll_ticks);
        Self {
            mode,
            config,
            source,
            action: Action::Modem,
            buffer: ReceiveBuffer::new(),
            poller,
            completion: CompletionMonitor::new(),
            started: None,
            version: None,
        }
    }

    /// Session mode.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Firmware image this session updates from.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Current action.
    pub fn action(&self) -> ActionKind {
        match &self.action {
            Action::Modem => ActionKind::Modem,
            Action::BootloaderUnbridged => ActionKind::BootloaderUnbridged,
            Action::BootloaderBridged => ActionKind::BootloaderBridged,
            Action::UserApplication => ActionKind::UserApplication,
            Action::AwaitingConfirmation => ActionKind::AwaitingConfirmation,
            Action::Transfer(sender) => ActionKind::Transfer(sender.state()),
            Action::Done => ActionKind::Done,
        }
    }

    /// The transfer engine, once the transfer has begun.
    pub fn transfer(&self) -> Option<&XmodemSender<S::Reader>> {
        match &self.action {
            Action::Transfer(sender) => Some(sender),
            _ => None,
        }
    }

    /// Bytes received and not yet interpreted.
    pub fn received(&self) -> &[u8] {
        self.buffer
            .as_bytes()
    }

    /// Firmware version reported by the modem, once known.
    pub fn version(&self) -> Option<&str> {
        self.version
            .as_deref()
    }

    /// Whether the bootloader poller expects ticks.
    pub fn is_polling(&self) -> bool {
        self.poller
            .is_active()
    }

    /// Whether the session has finished or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self.action, Action::Done)
    }

    /// Time since [`start`](Self::start).
    pub fn elapsed(&self) -> Duration {
        self.started
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Start the session clock and query the firmware version.
    pub fn start(&mut self) -> Vec<Effect> {
        info!("Starting {} with {}", self.mode, self.source.name());
        self.started = Some(Instant::now());
        vec![
            log_line("Querying module firmware version"),
            transmit(Command::VersionQuery),
        ]
    }

    /// Process one event and return what to do about it.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.is_finished() {
            return effects;
        }

        let result = match event {
            Event::BytesReceived(bytes) => self.on_bytes(&bytes, &mut effects),
            Event::WriteCompleted(count) => {
                self.on_write_completed(count, &mut effects);
                Ok(())
            },
            Event::TimerTick { status_signal } => self.on_tick(status_signal, &mut effects),
            Event::Confirmation(accepted) => self.on_confirmation(accepted, &mut effects),
        };

        if let Err(err) = result {
            self.fail(err, &mut effects);
        }
        effects
    }

    fn on_bytes(&mut self, bytes: &[u8], effects: &mut Vec<Effect>) -> Result<()> {
        match &mut self.action {
            Action::Transfer(sender) => {
                let step = sender.on_bytes(bytes)?;
                self.apply_step(step, effects);
            },
            Action::Modem
            | Action::BootloaderUnbridged
            | Action::BootloaderBridged
            | Action::UserApplication => {
                self.buffer
                    .append(bytes);
                self.detect(effects)?;
            },
            Action::AwaitingConfirmation | Action::Done => {
                debug!("Ignoring {} bytes received while idle", bytes.len());
            },
        }
        Ok(())
    }

    fn detect(&mut self, effects: &mut Vec<Effect>) -> Result<()> {
        match self.action {
            Action::BootloaderUnbridged => {
                self.buffer
                    .take_and_clear();
                debug!("Bootloader unlocked, bridging UARTs");
                effects.push(log_line("Bridging UARTs to the modem"));
                effects.push(transmit(Command::BridgeUarts));
                self.action = Action::BootloaderBridged;
            },
            Action::BootloaderBridged => {
                if self.buffer.len() > WAKEUP_RESPONSE_MIN_LEN {
                    self.buffer
                        .take_and_clear();
                    effects.push(log_line("Modem awake, querying firmware version"));
                    effects.push(transmit(Command::VersionQuery));
                    self.action = Action::Modem;
                }
            },
            Action::Modem => self.classify_modem_reply(effects)?,
            // Bootloader entrance is decided by the poller
            _ => {},
        }
        Ok(())
    }

    fn classify_modem_reply(&mut self, effects: &mut Vec<Effect>) -> Result<()> {
        let classification = classify(self.buffer.as_bytes());
        debug!(
            "Classified {} buffered bytes as {:?} ({})",
            self.buffer.len(),
            classification,
            classification.device_mode()
        );

        match classification {
            Classification::Bootloader => {
                effects.push(log_line("Module is in bootloader mode, unlocking"));
                effects.push(transmit(Command::BootloaderUnlock));
                self.action = Action::BootloaderUnbridged;
            },
            Classification::Modem { version } => {
                self.buffer
                    .take_and_clear();
                self.on_version(version, effects)?;
            },
            Classification::ModemError => {
                self.buffer
                    .take_and_clear();
                effects.push(log_line("UARTs already bridged, querying firmware version"));
                effects.push(transmit(Command::VersionQuery));
            },
            Classification::UserApplication => {
                self.buffer
                    .take_and_clear();
                effects.push(log_line(
                    "User application is running, rebooting module into bootloader",
                ));
                effects.push(transmit(Command::EnterBootloader));
                self.action = Action::UserApplication;
                self.poller
                    .start();
                effects.push(Effect::StartPoller);
            },
            Classification::ModemPartial | Classification::Undetermined => {},
        }
        Ok(())
    }

    fn on_version(&mut self, version: String, effects: &mut Vec<Effect>) -> Result<()> {
        info!("Modem firmware version: {version}");
        effects.push(log_line(format!("Modem firmware version: {version}")));
        effects.push(Effect::Report(Report::VersionDiscovered(version.clone())));
        self.version = Some(version.clone());

        match self.mode {
            SessionMode::Query => {
                self.action = Action::Done;
                effects.push(Effect::Finish(Outcome::Version(version)));
                Ok(())
            },
            SessionMode::ModeCheckBeforeUpdate if !self.source.matches_version(&version) => {
                warn!(
                    "Image '{}' is not tagged for firmware {version}",
                    self.source.name()
                );
                self.action = Action::AwaitingConfirmation;
                effects.push(Effect::Confirm(UpgradePrompt {
                    version,
                    image: self
                        .source
                        .name()
                        .to_string(),
                }));
                Ok(())
            },
            SessionMode::ModeCheckBeforeUpdate | SessionMode::FirmwareUpdate => {
                self.begin_transfer(effects)
            },
        }
    }

    fn on_confirmation(&mut self, accepted: bool, effects: &mut Vec<Effect>) -> Result<()> {
        if !matches!(self.action, Action::AwaitingConfirmation) {
            debug!("Ignoring unexpected confirmation");
            return Ok(());
        }

        if accepted {
            self.begin_transfer(effects)
        } else {
            info!("Update declined");
            self.action = Action::Done;
            effects.push(log_line("Firmware update cancelled"));
            effects.push(Effect::Finish(Outcome::Declined));
            Ok(())
        }
    }

    fn begin_transfer(&mut self, effects: &mut Vec<Effect>) -> Result<()> {
        let OpenImage { reader, size } = self
            .source
            .open()?;

        info!("Announcing {} ({size} bytes)", self.source.name());
        effects.push(log_line(format!(
            "Starting firmware update with {} ({size} bytes)",
            self.source.name()
        )));

        let sender =
            XmodemSender::new(reader, size).with_max_retries(self.config.max_nack_retries);
        self.action = Action::Transfer(sender);
        effects.push(transmit(Command::UpgradeStart(size)));
        Ok(())
    }

    fn apply_step(&mut self, step: Step, effects: &mut Vec<Effect>) {
        match step {
            Step::Idle => {},
            Step::Packet {
                frame,
                progress,
                sequence,
                offset,
                length,
            } => {
                effects.push(detail(format!(
                    "Sending packet #{sequence}, offset {offset} of length {length}"
                )));
                effects.push(Effect::Report(Report::Progress(progress)));
                effects.push(Effect::Transmit(frame));
            },
            Step::Retransmit(frame) => {
                let sequence = frame
                    .get(1)
                    .copied()
                    .unwrap_or_default();
                effects.push(detail(format!("Got NAK, resending packet #{sequence}")));
                effects.push(Effect::Transmit(frame));
            },
            Step::EndOfTransmission(frame) => {
                effects.push(detail("Got ACK for the final packet"));
                effects.push(log_line("Image sent, ending transfer"));
                effects.push(Effect::Transmit(frame));
            },
            Step::Accept(frame) => {
                self.completion
                    .arm(frame.len());
                effects.push(log_line("Transfer finished, accepting update"));
                effects.push(Effect::Transmit(frame));
            },
        }
    }

    fn on_write_completed(&mut self, count: usize, effects: &mut Vec<Effect>) {
        let finished = matches!(
            &self.action,
            Action::Transfer(sender) if sender.state() == TransferState::Finished
        );
        if !finished || !self.completion.record(count) {
            return;
        }

        let elapsed = self.elapsed();
        info!("Firmware update finished in {:.1}s", elapsed.as_secs_f64());
        self.action = Action::Done;
        effects.push(Effect::Report(Report::Progress(100)));
        effects.push(Effect::Report(Report::Completed { elapsed }));
        effects.push(Effect::Finish(Outcome::Updated { elapsed }));
    }

    fn on_tick(&mut self, status_signal: bool, effects: &mut Vec<Effect>) -> Result<()> {
        if !matches!(self.action, Action::UserApplication) {
            return Ok(());
        }

        match self.poller.tick(status_signal) {
            PollResult::Entered => {
                effects.push(Effect::StopPoller);
                effects.push(log_line("CTS asserted, module is in bootloader mode"));
                effects.push(transmit(Command::BootloaderUnlock));
                self.action = Action::BootloaderUnbridged;
                Ok(())
            },
            PollResult::TimedOut { checks } => {
                effects.push(Effect::StopPoller);
                Err(Error::BootloaderEntry { checks })
            },
            PollResult::Pending | PollResult::Idle => Ok(()),
        }
    }

    fn fail(&mut self, err: Error, effects: &mut Vec<Effect>) {
        warn!("Session failed: {err}");
        if self.poller.is_active() {
            self.poller
                .stop();
            effects.push(Effect::StopPoller);
        }
        self.action = Action::Done;
        effects.push(Effect::Fail(err));
    }
}

fn transmit(command: Command) -> Effect {
    debug!("Sending {command}");
    Effect::Transmit(command.encode())
}

fn log_line(message: impl Into<String>) -> Effect {
    Effect::Report(Report::Log(message.into()))
}

fn detail(message: impl Into<String>) -> Effect {
    Effect::Report(Report::Detail(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MemoryImage;
    use crate::protocol::xmodem::{FRAME_SIZE, control};
    use std::io::{self, Cursor};
    use std::path::PathBuf;

    const VERSION_REPLY: &[u8] = b"ATI3\r\r\nHL7800.4.6.9.4\r\n\r\nOK\r\n";

    fn session(mode: SessionMode, name: &str, len: usize) -> Session<MemoryImage> {
        let image = MemoryImage::new(name, vec![0xA5; len]);
        let mut session = Session::new(mode, image, SessionConfig::default());
        session.start();
        session
    }

    fn transmitted(effects: &[Effect]) -> Vec<Vec<u8>> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Transmit(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn bytes(data: &[u8]) -> Event {
        Event::BytesReceived(data.to_vec())
    }

    #[test]
    fn test_query_constructor() {
        let mut session = Session::query(SessionConfig::default());
        assert_eq!(session.mode(), SessionMode::Query);
        assert_eq!(transmitted(&session.start()), vec![b"ATI3\r".to_vec()]);
    }

    #[test]
    fn test_start_sends_version_query() {
        let image = MemoryImage::new("fw.foto", vec![]);
        let mut session = Session::new(SessionMode::Query, image, SessionConfig::default());
        let effects = session.start();
        assert_eq!(transmitted(&effects), vec![b"ATI3\r".to_vec()]);
        assert_eq!(session.action(), ActionKind::Modem);
    }

    #[test]
    fn test_query_reports_version_and_clears_buffer() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);

        assert!(s.handle(bytes(b"ATI3\r\r\nHL78")).is_empty());
        assert_eq!(s.received(), b"ATI3\r\r\nHL78");

        let effects = s.handle(bytes(b"00.4.6.9.4\r\n"));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Report(Report::VersionDiscovered(v)) if v == "4.6.9.4"
        )));
        assert!(matches!(
            effects.last(),
            Some(Effect::Finish(Outcome::Version(v))) if v == "4.6.9.4"
        ));
        assert!(transmitted(&effects).is_empty());
        assert!(s.received().is_empty());
        assert!(s.is_finished());
        assert_eq!(s.version(), Some("4.6.9.4"));

        assert!(s.handle(bytes(VERSION_REPLY)).is_empty());
    }

    #[test]
    fn test_modem_marker_beats_not_found() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        let effects = s.handle(bytes(b"sh: not found\r\nHL7800.4.6.9.4\r\n"));
        assert!(matches!(effects.last(), Some(Effect::Finish(Outcome::Version(_)))));
        assert!(transmitted(&effects).is_empty());
    }

    #[test]
    fn test_bootloader_unlock_sent_once() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);

        let effects = s.handle(bytes(&[b'f', 0x04]));
        assert_eq!(
            transmitted(&effects),
            vec![vec![0x70, 0x0F, 0x51, 0x2A, 0x51]]
        );
        assert_eq!(s.action(), ActionKind::BootloaderUnbridged);

        // Next reply bridges instead of unlocking again
        let effects = s.handle(bytes(&[b'f', 0x04]));
        assert_eq!(
            transmitted(&effects),
            vec![vec![0x7E, 0x01, 0x06, 0x01, 0x06]]
        );
        assert_eq!(s.action(), ActionKind::BootloaderBridged);
        assert!(s.received().is_empty());
    }

    #[test]
    fn test_bridge_wakeup_then_query() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        s.handle(bytes(&[b'f', 0x04]));
        s.handle(bytes(b"k"));

        assert!(s.handle(bytes(b"\r\n")).is_empty());
        assert!(s.handle(bytes(b"O")).is_empty());
        let effects = s.handle(bytes(b"K"));
        assert_eq!(transmitted(&effects), vec![b"ATI3\r".to_vec()]);
        assert_eq!(s.action(), ActionKind::Modem);
        assert!(s.received().is_empty());

        let effects = s.handle(bytes(VERSION_REPLY));
        assert!(matches!(effects.last(), Some(Effect::Finish(Outcome::Version(_)))));
    }

    #[test]
    fn test_modem_error_requeries() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        let effects = s.handle(bytes(b"AT\r\r\nERROR\r\n"));
        assert_eq!(transmitted(&effects), vec![b"ATI3\r".to_vec()]);
        assert_eq!(s.action(), ActionKind::Modem);
        assert!(s.received().is_empty());
    }

    #[test]
    fn test_user_application_starts_poller() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        let effects = s.handle(bytes(b"ATI3: command not found\r\n"));

        assert_eq!(
            transmitted(&effects),
            vec![b"mg100 bootloader\r\noob bootloader\r\n".to_vec()]
        );
        assert!(matches!(effects.last(), Some(Effect::StartPoller)));
        assert_eq!(s.action(), ActionKind::UserApplication);
        assert!(s.is_polling());

        // Console chatter while rebooting is not acted on
        assert!(s.handle(bytes(b"ATI3: command not found\r\n")).is_empty());

        let effects = s.handle(Event::TimerTick {
            status_signal: true,
        });
        assert!(matches!(effects.first(), Some(Effect::StopPoller)));
        assert_eq!(
            transmitted(&effects),
            vec![vec![0x70, 0x0F, 0x51, 0x2A, 0x51]]
        );
        assert_eq!(s.action(), ActionKind::BootloaderUnbridged);
        assert!(!s.is_polling());
    }

    #[test]
    fn test_bootloader_entry_times_out_once() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        s.handle(bytes(&[b'.'; 40]));

        for _ in 0..4 {
            let effects = s.handle(Event::TimerTick {
                status_signal: false,
            });
            assert!(effects.is_empty());
        }

        let effects = s.handle(Event::TimerTick {
            status_signal: false,
        });
        let failures = effects
            .iter()
            .filter(|e| matches!(e, Effect::Fail(Error::BootloaderEntry { checks: 5 })))
            .count();
        assert_eq!(failures, 1);
        assert!(matches!(effects.first(), Some(Effect::StopPoller)));
        assert!(s.is_finished());

        assert!(
            s.handle(Event::TimerTick {
                status_signal: false,
            })
            .is_empty()
        );
    }

    #[test]
    fn test_full_update_two_packets() {
        let mut s = session(SessionMode::FirmwareUpdate, "fw.foto", 2048);

        let effects = s.handle(bytes(VERSION_REPLY));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSD=2048\r\n".to_vec()]);
        assert_eq!(
            s.action(),
            ActionKind::Transfer(TransferState::WaitForFirstNack)
        );

        // Stray ACK before the opening NAK
        assert!(transmitted(&s.handle(bytes(&[control::ACK]))).is_empty());

        let effects = s.handle(bytes(&[control::NAK]));
        let frames = transmitted(&effects);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), FRAME_SIZE);
        assert_eq!(&frames[0][..3], &[control::STX, 1, 0xFE]);
        let transfer = s.transfer().unwrap();
        assert_eq!((transfer.offset(), transfer.sequence()), (1024, 2));

        let effects = s.handle(bytes(&[control::ACK]));
        assert!(
            effects
                .iter()
                .any(|e| matches!(e, Effect::Report(Report::Progress(50))))
        );
        assert_eq!(transmitted(&effects)[0][1], 2);
        assert!(s.transfer().unwrap().final_packet_sent());

        let effects = s.handle(bytes(&[control::ACK]));
        assert_eq!(transmitted(&effects), vec![vec![control::EOT]]);

        let effects = s.handle(bytes(&[control::ACK]));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSR=4\r\n".to_vec()]);
        assert_eq!(s.action(), ActionKind::Transfer(TransferState::Finished));
        assert!(!s.transfer().unwrap().is_open());

        assert!(s.handle(Event::WriteCompleted(5)).is_empty());
        let effects = s.handle(Event::WriteCompleted(6));
        assert!(matches!(
            effects.as_slice(),
            [
                Effect::Report(Report::Progress(100)),
                Effect::Report(Report::Completed { .. }),
                Effect::Finish(Outcome::Updated { .. }),
            ]
        ));
        assert!(s.is_finished());
    }

    #[test]
    fn test_write_completions_before_finish_are_ignored() {
        let mut s = session(SessionMode::FirmwareUpdate, "fw.foto", 100);
        s.handle(bytes(VERSION_REPLY));
        assert!(s.handle(Event::WriteCompleted(14)).is_empty());
        s.handle(bytes(&[control::NAK]));
        assert!(s.handle(Event::WriteCompleted(FRAME_SIZE)).is_empty());
        assert!(!s.is_finished());
    }

    #[test]
    fn test_matching_image_skips_confirmation() {
        let mut s = session(
            SessionMode::ModeCheckBeforeUpdate,
            "4.6.9.4_to4.7.1.0.foto",
            10,
        );
        let effects = s.handle(bytes(VERSION_REPLY));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Confirm(_))));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSD=10\r\n".to_vec()]);
    }

    #[test]
    fn test_mismatched_image_declined() {
        let mut s = session(
            SessionMode::ModeCheckBeforeUpdate,
            "4.4.14.0_to4.6.9.4.foto",
            10,
        );
        let effects = s.handle(bytes(VERSION_REPLY));
        let prompt = effects
            .iter()
            .find_map(|e| match e {
                Effect::Confirm(prompt) => Some(prompt.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(prompt.version, "4.6.9.4");
        assert_eq!(prompt.image, "4.4.14.0_to4.6.9.4.foto");
        assert!(transmitted(&effects).is_empty());
        assert_eq!(s.action(), ActionKind::AwaitingConfirmation);

        let effects = s.handle(Event::Confirmation(false));
        assert!(matches!(effects.last(), Some(Effect::Finish(Outcome::Declined))));
        assert!(transmitted(&effects).is_empty());
        assert!(s.is_finished());
    }

    #[test]
    fn test_mismatched_image_confirmed() {
        let mut s = session(SessionMode::ModeCheckBeforeUpdate, "other.foto", 10);
        s.handle(bytes(VERSION_REPLY));
        let effects = s.handle(Event::Confirmation(true));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSD=10\r\n".to_vec()]);
    }

    #[test]
    fn test_firmware_update_skips_version_gate() {
        let mut s = session(SessionMode::FirmwareUpdate, "other.foto", 10);
        let effects = s.handle(bytes(VERSION_REPLY));
        assert!(!effects.iter().any(|e| matches!(e, Effect::Confirm(_))));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSD=10\r\n".to_vec()]);
    }

    struct MissingImage;

    impl FirmwareSource for MissingImage {
        type Reader = Cursor<Vec<u8>>;

        fn name(&self) -> &str {
            "missing.foto"
        }

        fn open(&self) -> Result<OpenImage<Self::Reader>> {
            Err(Error::FirmwareOpen {
                path: PathBuf::from("missing.foto"),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        }
    }

    #[test]
    fn test_open_failure_fails_session() {
        let mut s = Session::new(
            SessionMode::FirmwareUpdate,
            MissingImage,
            SessionConfig::default(),
        );
        s.start();

        let effects = s.handle(bytes(VERSION_REPLY));
        assert!(matches!(
            effects.last(),
            Some(Effect::Fail(Error::FirmwareOpen { .. }))
        ));
        assert!(transmitted(&effects).is_empty());
        assert!(s.is_finished());
    }

    /// Opens fine, then fails every read.
    struct UnreadableImage;

    struct UnreadableReader;

    impl io::Read for UnreadableReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("bad sector"))
        }
    }

    impl io::Seek for UnreadableReader {
        fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    impl FirmwareSource for UnreadableImage {
        type Reader = UnreadableReader;

        fn name(&self) -> &str {
            "unreadable.foto"
        }

        fn open(&self) -> Result<OpenImage<Self::Reader>> {
            Ok(OpenImage {
                reader: UnreadableReader,
                size: 2048,
            })
        }
    }

    #[test]
    fn test_read_failure_during_transfer_fails_session() {
        let mut s = Session::new(
            SessionMode::FirmwareUpdate,
            UnreadableImage,
            SessionConfig::default(),
        );
        s.start();
        let effects = s.handle(bytes(VERSION_REPLY));
        assert_eq!(transmitted(&effects), vec![b"AT+WDSD=2048\r\n".to_vec()]);

        let effects = s.handle(bytes(&[control::NAK]));
        assert!(transmitted(&effects).is_empty());
        assert!(matches!(
            effects.last(),
            Some(Effect::Fail(Error::FirmwareRead(_)))
        ));
        assert!(s.is_finished());
        assert!(s.handle(bytes(&[control::NAK])).is_empty());
    }

    #[test]
    fn test_transfer_reports_packet_details() {
        let mut s = session(SessionMode::FirmwareUpdate, "fw.foto", 1500);
        s.handle(bytes(VERSION_REPLY));

        let details = |effects: &[Effect]| -> Vec<String> {
            effects
                .iter()
                .filter_map(|e| match e {
                    Effect::Report(Report::Detail(line)) => Some(line.clone()),
                    _ => None,
                })
                .collect()
        };

        let effects = s.handle(bytes(&[control::NAK]));
        assert_eq!(
            details(&effects),
            vec!["Sending packet #1, offset 0 of length 1024"]
        );

        let effects = s.handle(bytes(&[control::NAK]));
        assert_eq!(details(&effects), vec!["Got NAK, resending packet #1"]);

        let effects = s.handle(bytes(&[control::ACK]));
        assert_eq!(
            details(&effects),
            vec!["Sending packet #2, offset 1024 of length 476"]
        );

        let effects = s.handle(bytes(&[control::ACK]));
        assert_eq!(details(&effects), vec!["Got ACK for the final packet"]);
    }

    #[test]
    fn test_retry_limit_fails_session() {
        let image = MemoryImage::new("fw.foto", vec![0; 4096]);
        let config = SessionConfig::default().with_max_nack_retries(Some(1));
        let mut s = Session::new(SessionMode::FirmwareUpdate, image, config);
        s.start();
        s.handle(bytes(VERSION_REPLY));
        s.handle(bytes(&[control::NAK]));

        let effects = s.handle(bytes(&[control::NAK]));
        assert_eq!(transmitted(&effects).len(), 1);

        let effects = s.handle(bytes(&[control::NAK]));
        assert!(matches!(
            effects.last(),
            Some(Effect::Fail(Error::RetryLimit { sequence: 1, retries: 1 }))
        ));
        assert!(s.is_finished());
    }

    #[test]
    fn test_unexpected_events_are_ignored() {
        let mut s = session(SessionMode::Query, "fw.foto", 0);
        assert!(s.handle(Event::Confirmation(true)).is_empty());
        assert!(
            s.handle(Event::TimerTick {
                status_signal: true,
            })
            .is_empty()
        );
        assert!(s.handle(Event::WriteCompleted(5)).is_empty());
        assert_eq!(s.action(), ActionKind::Modem);
    }
}
