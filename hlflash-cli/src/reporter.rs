//! Terminal rendering of session notifications.

use {
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    hlflash::{Error, Reporter, UpgradePrompt},
    indicatif::{ProgressBar, ProgressStyle},
    log::{debug, warn},
    std::{io::IsTerminal, time::Duration},
};

/// Renders progress on stderr and asks for confirmation on the terminal.
pub(crate) struct CliReporter {
    quiet: bool,
    non_interactive: bool,
    fancy: bool,
    pb: Option<ProgressBar>,
}

impl CliReporter {
    pub(crate) fn new(quiet: bool, non_interactive: bool, fancy: bool) -> Self {
        Self {
            quiet,
            non_interactive,
            fancy,
            pb: None,
        }
    }

    /// Print a line without tearing the progress bar.
    fn println(&self, line: &str) {
        match &self.pb {
            Some(pb) => pb.suspend(|| eprintln!("{line}")),
            None => eprintln!("{line}"),
        }
    }

    fn progress_bar(&mut self) -> &ProgressBar {
        let (quiet, fancy) = (self.quiet, self.fancy);
        self.pb
            .get_or_insert_with(|| {
                if quiet || !fancy {
                    return ProgressBar::hidden();
                }
                let pb = ProgressBar::new(100);
                #[allow(clippy::unwrap_used)] // Static template string
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template(
                            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}",
                        )
                        .unwrap()
                        .progress_chars("#>-"),
                );
                pb.set_message("Sending firmware");
                pb
            })
    }
}

impl Reporter for CliReporter {
    fn log(&mut self, message: &str) {
        debug!("{message}");
        if !self.quiet {
            self.println(&format!("{} {message}", style("ℹ").blue()));
        }
    }

    fn detail(&mut self, message: &str) {
        if !self.quiet && log::log_enabled!(log::Level::Debug) {
            self.println(&format!("    {}", style(message).dim()));
        }
    }

    fn progress(&mut self, percent: u8) {
        self.progress_bar()
            .set_position(u64::from(percent));
    }

    fn version_discovered(&mut self, version: &str) {
        if !self.quiet {
            self.println(&format!(
                "{} Modem firmware version: {}",
                style("✓").green(),
                style(version)
                    .cyan()
                    .bold()
            ));
        }
    }

    fn error(&mut self, error: &Error) {
        debug!("Session failed: {error}");
        if let Some(pb) = self.pb.take() {
            pb.abandon();
        }
    }

    fn completed(&mut self, elapsed: Duration) {
        if let Some(pb) = self.pb.take() {
            pb.finish_with_message("done");
        }
        if !self.quiet {
            eprintln!(
                "{} Firmware accepted in {:.1}s",
                style("✓").green(),
                elapsed.as_secs_f64()
            );
        }
    }

    fn confirm_upgrade(&mut self, prompt: &UpgradePrompt) -> bool {
        if self.non_interactive || !std::io::stdin().is_terminal() {
            warn!("{prompt}");
            warn!("Not confirming in non-interactive mode, use --yes to skip the version check");
            return false;
        }

        let answer = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt.to_string())
            .default(false)
            .interact_opt();
        match answer {
            Ok(Some(accepted)) => accepted,
            Ok(None) => false,
            Err(err) => {
                warn!("Confirmation prompt failed: {err}");
                false
            },
        }
    }
}
