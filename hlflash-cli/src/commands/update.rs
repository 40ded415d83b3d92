//! Firmware update command.

use {
    crate::{
        Cli, CliError, config::Config, get_port, reporter::CliReporter, serial_config,
        use_fancy_output,
    },
    anyhow::{Context, Result},
    console::style,
    hlflash::{FirmwareImage, Outcome, Session, SessionConfig, SessionMode, Updater},
    log::warn,
    std::path::Path,
};

/// Pick the session mode: `--yes` or `assume_yes` skips the version check.
fn session_mode(yes: bool, config: &Config) -> SessionMode {
    if yes || config.update.assume_yes {
        SessionMode::FirmwareUpdate
    } else {
        SessionMode::ModeCheckBeforeUpdate
    }
}

/// Reject missing images before touching the port.
fn check_firmware(firmware: &Path) -> Result<()> {
    if firmware.is_file() {
        Ok(())
    } else {
        Err(CliError::Usage(format!(
            "Firmware file not found: {}",
            firmware.display()
        ))
        .into())
    }
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &Config,
    firmware: &Path,
    yes: bool,
    max_nack_retries: Option<u32>,
) -> Result<()> {
    check_firmware(firmware)?;

    let image = FirmwareImage::new(firmware);
    let size = image
        .size()
        .with_context(|| format!("Failed to load firmware {}", firmware.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Firmware {} ({} bytes, {} packets)",
            style("📦").cyan(),
            style(firmware.display()).cyan(),
            size,
            image.packet_count()?
        );
        if let Some(tag) = image.version_tag() {
            eprintln!("    {} {tag}", style("•").dim());
        }
    }

    let port = get_port(cli, config)?;
    let serial = serial_config(cli, config, &port);
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port).cyan(),
            serial.baud_rate
        );
    }

    let session_config = SessionConfig::default()
        .with_max_nack_retries(max_nack_retries.or(config.update.max_nack_retries));
    let session = Session::new(session_mode(yes, config), image, session_config);

    let mut updater =
        Updater::open(&serial).with_context(|| format!("Failed to open serial port {port}"))?;
    let mut reporter = CliReporter::new(cli.quiet, cli.non_interactive, use_fancy_output());
    let outcome = updater
        .run(session, &mut reporter)
        .context("Firmware update failed")?;

    match outcome {
        Outcome::Updated { .. } => {
            if !cli.quiet {
                eprintln!(
                    "\n{} Firmware update complete, the modem will now restart",
                    style("✓")
                        .green()
                        .bold()
                );
            }
        },
        Outcome::Declined => {
            warn!("Firmware update declined, nothing was sent to the modem");
        },
        Outcome::Version(version) => {
            warn!("Session ended after reading version {version} without updating");
        },
    }

    Ok(())
}
