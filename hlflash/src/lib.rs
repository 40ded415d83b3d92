//! # hlflash
//!
//! A library for updating the firmware of Sierra Wireless HL7800 cellular
//! modules over a serial link.
//!
//! The module may be found in one of three modes: its secondary bootloader,
//! the modem firmware itself (reachable through a UART bridge), or a user
//! application running on the host MCU. A [`Session`] works out which one
//! is answering, walks the module to the modem, reads its firmware version
//! and streams a FOTA image with the modem's XModem-1K variant.
//!
//! The session is a pure state machine and never performs I/O; the
//! [`Updater`] pumps bytes between it and a [`Port`].
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use hlflash::{FirmwareImage, LogReporter, SerialConfig, Session, SessionConfig, SessionMode};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::new("4.4.14.0_to4.6.9.4.foto");
//!     let session = Session::new(
//!         SessionMode::ModeCheckBeforeUpdate,
//!         image,
//!         SessionConfig::default(),
//!     );
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut updater = hlflash::Updater::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!         let outcome = updater.run(session, &mut LogReporter)?;
//!         println!("{outcome:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod session;
pub mod updater;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by the event pump.
///
/// The checker should return `true` when the current session should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    device::{DetectedPort, DeviceKind, detect_ports},
    error::{Error, Result},
    image::{FirmwareImage, FirmwareSource, MemoryImage, VersionTag},
    port::{FlowControl, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::Command,
    session::{
        Effect, Event, Outcome, Report, Session, SessionConfig, SessionMode, UpgradePrompt,
    },
    updater::{LogReporter, Reporter, Updater},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_toggle() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());

        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
