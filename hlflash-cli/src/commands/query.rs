//! Firmware version query command.

use {
    crate::{Cli, config::Config, get_port, reporter::CliReporter, serial_config, use_fancy_output},
    anyhow::{Context, Result, bail},
    console::style,
    hlflash::{Outcome, Session, SessionConfig, Updater},
};

/// Query command implementation. The version goes to stdout.
pub(crate) fn cmd_query(cli: &Cli, config: &Config) -> Result<()> {
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

    let mut updater =
        Updater::open(&serial).with_context(|| format!("Failed to open serial port {port}"))?;
    let mut reporter = CliReporter::new(cli.quiet, cli.non_interactive, use_fancy_output());
    let outcome = updater
        .run(Session::query(SessionConfig::default()), &mut reporter)
        .context("Version query failed")?;

    match outcome {
        Outcome::Version(version) => {
            println!("{version}");
            Ok(())
        },
        other => bail!("Unexpected query outcome: {other:?}"),
    }
}
