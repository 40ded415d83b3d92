//! Serial port selection.
//!
//! The port is chosen in this order:
//! - `--port` / `HLFLASH_PORT`
//! - `[connection] serial` from the config files
//! - the only detected candidate
//! - an interactive prompt when several candidates exist
//!
//! Non-interactive mode never prompts; an ambiguous choice is a usage error.

use {
    crate::{CliError, config::Config},
    anyhow::{Context, Result},
    console::style,
    dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme},
    hlflash::{DetectedPort, PortInfo, detect_ports},
    log::{debug, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

/// Select a serial port.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<DetectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config
        .connection
        .serial
    {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        return Err(usage_err(
            "No serial ports found. Connect the module or pass --port",
        ));
    }

    let candidates = candidate_ports(ports);

    if options.non_interactive {
        return select_single_port(candidates);
    }

    match candidates
        .len()
        .cmp(&1)
    {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(candidates)
        },
        _ => {
            let port = select_single_port(candidates)?;
            info!("Auto-selected port: {port}");
            Ok(port)
        },
    }
}

/// Recognised adapters when there are any, otherwise every port.
fn candidate_ports(ports: Vec<DetectedPort>) -> Vec<DetectedPort> {
    if ports
        .iter()
        .any(DetectedPort::is_likely_module)
    {
        ports
            .into_iter()
            .filter(DetectedPort::is_likely_module)
            .collect()
    } else {
        ports
    }
}

/// Exactly one candidate is a valid choice; anything else needs `--port`.
fn select_single_port(candidates: Vec<DetectedPort>) -> Result<DetectedPort> {
    let count = candidates.len();
    let mut candidates = candidates.into_iter();
    match (candidates.next(), count) {
        (Some(port), 1) => Ok(port),
        (Some(_), _) => Err(usage_err(
            "Multiple serial ports found; specify one with --port",
        )),
        (None, _) => Err(usage_err("No serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Multiple serial ports found and no terminal to ask; specify one with --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Look a port up by name, falling back to an unclassified entry.
fn find_port_by_name(name: &str) -> DetectedPort {
    let ports = detect_ports().unwrap_or_default();

    ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| {
            ports
                .iter()
                .find(|p| {
                    p.name
                        .eq_ignore_ascii_case(name)
                })
        })
        .cloned()
        .unwrap_or_else(|| {
            DetectedPort::from(PortInfo {
                name: name.to_string(),
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial_number: None,
            })
        })
}

/// Interactive port selection.
fn select_port_interactive(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );

    let term_width = console::Term::stderr()
        .size()
        .1 as usize;
    let max_item_width = term_width.saturating_sub(4);
    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            let label = if port.is_likely_module() {
                style(port.to_string())
                    .bold()
                    .to_string()
            } else {
                port.to_string()
            };
            console::truncate_str(&label, max_item_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the serial port of the module")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => ports
            .into_iter()
            .nth(index)
            .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}")),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}
