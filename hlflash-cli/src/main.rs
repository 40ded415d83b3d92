//! hlflash CLI - Command-line tool for updating HL7800 modem firmware.
//!
//! ## Features
//!
//! - Update the modem over a UART bridge, the bootloader or a user application
//! - Query the running modem firmware version
//! - Inspect FOTA images
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    clap_complete::Shell,
    console::style,
    env_logger::Env,
    hlflash::{FlowControl, SerialConfig, port::DEFAULT_BAUD},
    log::{debug, warn},
    std::{
        env,
        path::PathBuf,
        sync::atomic::{AtomicBool, Ordering},
    },
    thiserror::Error,
};

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether Ctrl-C was pressed.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

mod commands;
mod config;
mod reporter;
mod serial;

use config::Config;
use serial::{SerialOptions, select_serial_port};

/// Errors with a dedicated exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Bad invocation; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// hlflash - Firmware updater for HL7800 cellular modems.
///
/// Environment variables:
///   HLFLASH_PORT              - Default serial port
///   HLFLASH_BAUD              - Default baud rate (default: 115200)
///   HLFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "hlflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "HLFLASH_PORT")]
    pub(crate) port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "HLFLASH_BAUD")]
    pub(crate) baud: Option<u32>,

    /// Flow control: none, hardware or software [default: hardware].
    #[arg(long, global = true, value_name = "MODE")]
    pub(crate) flow_control: Option<FlowControl>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HLFLASH_NON_INTERACTIVE")]
    pub(crate) non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Update the modem firmware with a FOTA image.
    Update {
        /// Firmware image (.foto / .ua).
        firmware: PathBuf,

        /// Skip the firmware version check.
        #[arg(short, long)]
        yes: bool,

        /// Give up after this many retransmissions of one packet.
        #[arg(long, value_name = "N")]
        max_nack_retries: Option<u32>,
    },

    /// Print the modem firmware version.
    Query,

    /// Show information about a firmware image.
    Info {
        /// Firmware image.
        firmware: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (detected from $SHELL if omitted).
        #[arg(value_enum)]
        shell: Option<Shell>,
    },
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            exit_code(&err)
        },
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<()> {
    init_logging(cli);

    debug!(
        "hlflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(err) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        warn!("Failed to install Ctrl-C handler: {err}");
    }
    hlflash::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Update {
            firmware,
            yes,
            max_nack_retries,
        } => commands::update::cmd_update(cli, &config, firmware, *yes, *max_nack_retries),
        Commands::Query => commands::query::cmd_query(cli, &config),
        Commands::Info { firmware, json } => commands::info::cmd_info(firmware, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell } => commands::completions::cmd_completions(*shell),
    }
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(cli_err) = cause.downcast_ref::<CliError>() {
            return match cli_err {
                CliError::Usage(_) => 2,
                CliError::Cancelled(_) => 130,
            };
        }
        if let Some(hlflash::Error::Interrupted) = cause.downcast_ref::<hlflash::Error>() {
            return 130;
        }
    }
    1
}

/// Get serial port from CLI args, config or interactive selection.
pub(crate) fn get_port(cli: &Cli, config: &Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        non_interactive: cli.non_interactive,
    };

    Ok(select_serial_port(&options, config)?.name)
}

/// Serial settings for `port`: flags, then config, then defaults.
pub(crate) fn serial_config(cli: &Cli, config: &Config, port: &str) -> SerialConfig {
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);
    let flow_control = cli
        .flow_control
        .or(config.connection.flow_control)
        .unwrap_or_default();

    SerialConfig::new(port, baud).with_flow_control(flow_control)
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_update() {
        let cli = Cli::try_parse_from([
            "hlflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "57600",
            "update",
            "4.4.14.0_to4.6.9.4.foto",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(57600));
        if let Commands::Update {
            firmware,
            yes,
            max_nack_retries,
        } = cli.command
        {
            assert_eq!(firmware.to_str().unwrap(), "4.4.14.0_to4.6.9.4.foto");
            assert!(!yes);
            assert!(max_nack_retries.is_none());
        } else {
            panic!("Expected Update command");
        }
    }

    #[test]
    fn test_cli_parse_update_with_all_options() {
        let cli = Cli::try_parse_from([
            "hlflash",
            "update",
            "fw.foto",
            "--yes",
            "--max-nack-retries",
            "10",
        ])
        .unwrap();
        if let Commands::Update {
            yes,
            max_nack_retries,
            ..
        } = cli.command
        {
            assert!(yes);
            assert_eq!(max_nack_retries, Some(10));
        } else {
            panic!("Expected Update command");
        }
    }

    #[test]
    fn test_cli_parse_update_requires_firmware() {
        assert!(Cli::try_parse_from(["hlflash", "update"]).is_err());
    }

    #[test]
    fn test_cli_parse_query() {
        let cli = Cli::try_parse_from(["hlflash", "query", "-p", "COM3"]).unwrap();
        assert!(matches!(cli.command, Commands::Query));
        assert_eq!(cli.port.as_deref(), Some("COM3"));
    }

    #[test]
    fn test_cli_parse_info_json() {
        let cli = Cli::try_parse_from(["hlflash", "info", "fw.foto", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Info { json: true, .. }));
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["hlflash", "list-ports"]).unwrap();
        assert!(matches!(cli.command, Commands::ListPorts { json: false }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["hlflash", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions {
                shell: Some(Shell::Zsh)
            }
        ));

        let cli = Cli::try_parse_from(["hlflash", "completions"]).unwrap();
        assert!(matches!(cli.command, Commands::Completions { shell: None }));
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "hlflash",
            "-vv",
            "--quiet",
            "--non-interactive",
            "--flow-control",
            "none",
            "--config",
            "custom.toml",
            "query",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.non_interactive);
        assert_eq!(cli.flow_control, Some(FlowControl::None));
        assert_eq!(
            cli.config_path
                .as_deref()
                .and_then(|p| p.to_str()),
            Some("custom.toml")
        );
    }

    #[test]
    fn test_cli_rejects_unknown_flow_control() {
        assert!(Cli::try_parse_from(["hlflash", "--flow-control", "rts", "query"]).is_err());
    }

    #[test]
    fn test_serial_config_defaults() {
        let cli = Cli::try_parse_from(["hlflash", "query"]).unwrap();
        let serial = serial_config(&cli, &Config::default(), "/dev/ttyUSB0");
        assert_eq!(serial.port_name, "/dev/ttyUSB0");
        assert_eq!(serial.baud_rate, DEFAULT_BAUD);
        assert_eq!(serial.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn test_serial_config_flags_override_config() {
        let mut config = Config::default();
        config.connection.baud = Some(9600);
        config.connection.flow_control = Some(FlowControl::Software);

        let cli = Cli::try_parse_from(["hlflash", "query"]).unwrap();
        let serial = serial_config(&cli, &config, "COM3");
        assert_eq!(serial.baud_rate, 9600);
        assert_eq!(serial.flow_control, FlowControl::Software);

        let cli = Cli::try_parse_from([
            "hlflash",
            "-b",
            "230400",
            "--flow-control",
            "off",
            "query",
        ])
        .unwrap();
        let serial = serial_config(&cli, &config, "COM3");
        assert_eq!(serial.baud_rate, 230_400);
        assert_eq!(serial.flow_control, FlowControl::None);
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("bad".to_string()).into();
        assert_eq!(exit_code(&usage), 2);

        let cancelled: anyhow::Error = CliError::Cancelled("stop".to_string()).into();
        assert_eq!(exit_code(&cancelled), 130);

        let interrupted =
            anyhow::Error::from(hlflash::Error::Interrupted).context("Firmware update failed");
        assert_eq!(exit_code(&interrupted), 130);

        let other = anyhow::anyhow!("boom");
        assert_eq!(exit_code(&other), 1);
    }
}
