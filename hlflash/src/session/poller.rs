//! Bootloader entrance polling.
//!
//! After the user application is told to reboot into its bootloader there
//! is no reply to wait for. The bootloader asserts CTS once it is up, so the
//! line is sampled on a fixed interval for a bounded number of ticks.

use log::{debug, trace};

/// What a poll tick concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// CTS is asserted, the bootloader is assumed to be running.
    Entered,
    /// Not yet; keep polling.
    Pending,
    /// The tick budget is spent.
    TimedOut {
        /// Ticks taken without seeing CTS.
        checks: u8,
    },
    /// The poller is not running; the tick is stale.
    Idle,
}

/// Bounded CTS poller.
#[derive(Debug, Clone)]
pub struct BootloaderPoller {
    max_checks: u8,
    checks: u8,
    active: bool,
}

impl BootloaderPoller {
    /// Create a stopped poller allowing `max_checks` ticks.
    pub fn new(max_checks: u8) -> Self {
        Self {
            max_checks,
            checks: 0,
            active: false,
        }
    }

    /// Start polling from a fresh tick count.
    pub fn start(&mut self) {
        debug!("Polling CTS for bootloader entrance ({} checks)", self.max_checks);
        self.checks = 0;
        self.active = true;
    }

    /// Stop polling.
    pub fn stop(&mut self) {
        self.active = false;
    }

    /// Whether the poller expects ticks.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Ticks taken since the last start.
    pub fn checks(&self) -> u8 {
        self.checks
    }

    /// Process one tick with the sampled status line.
    pub fn tick(&mut self, status_signal: bool) -> PollResult {
        if !self.active {
            return PollResult::Idle;
        }

        if status_signal {
            self.active = false;
            return PollResult::Entered;
        }

        self.checks = self
            .checks
            .saturating_add(1);
        trace!("CTS de-asserted (check {}/{})", self.checks, self.max_checks);

        if self.checks >= self.max_checks {
            self.active = false;
            PollResult::TimedOut {
                checks: self.checks,
            }
        } else {
            PollResult::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enters_on_cts() {
        let mut poller = BootloaderPoller::new(5);
        poller.start();

        assert_eq!(poller.tick(false), PollResult::Pending);
        assert_eq!(poller.tick(true), PollResult::Entered);
        assert!(!poller.is_active());
    }

    #[test]
    fn test_times_out_exactly_once() {
        let mut poller = BootloaderPoller::new(5);
        poller.start();

        for _ in 0..4 {
            assert_eq!(poller.tick(false), PollResult::Pending);
        }
        assert_eq!(poller.tick(false), PollResult::TimedOut { checks: 5 });
        assert!(!poller.is_active());

        // A late tick after the timer stopped does nothing
        assert_eq!(poller.tick(false), PollResult::Idle);
        assert_eq!(poller.tick(true), PollResult::Idle);
    }

    #[test]
    fn test_restart_resets_checks() {
        let mut poller = BootloaderPoller::new(2);
        poller.start();
        poller.tick(false);
        assert_eq!(poller.checks(), 1);

        poller.start();
        assert_eq!(poller.checks(), 0);
        assert_eq!(poller.tick(false), PollResult::Pending);
    }

    #[test]
    fn test_idle_when_never_started() {
        let mut poller = BootloaderPoller::new(5);
        assert_eq!(poller.tick(true), PollResult::Idle);
    }
}
