//! OBD-II Scanner
//!
//! Connects to a vehicle through an ELM327 adapter (or the built-in
//! simulated vehicle), reports trouble codes and logs live data until
//! interrupted.

use anyhow::{bail, Context};
use clap::Parser;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};
use obd_protocol::{Connector, DiagnosticTroubleCode, Elm327Connector, SimulatedVehicle};
use obd_scheduler::{LiveSample, SampleValue};
use obd_session::{ConnectionSession, ConnectionState, SessionConfig, SessionEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "obd-scanner";

/// Prefix of environment overrides, e.g. `OBD_DEVICE=/dev/ttyUSB1`
pub const ENV_PREFIX: &str = "OBD";

/// Command line options, layered over the configuration file
#[derive(Debug, Default, Parser)]
#[command(name = "obd-scanner")]
#[command(author, version, about = "OBD-II trouble codes and live data over ELM327")]
pub struct Cli {
    /// Configuration file path (default: ./obd-scanner.toml if present)
    #[arg(short, long, env = "OBD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serial device of the ELM327 adapter
    #[arg(short, long)]
    pub device: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    pub baud_rate: Option<u32>,

    /// Use the simulated vehicle instead of an adapter
    #[arg(long)]
    pub simulate: bool,

    /// Clear stored trouble codes after reporting them
    #[arg(long)]
    pub clear_codes: bool,

    /// Stop after this many samples (0 runs until Ctrl-C)
    #[arg(short = 'n', long)]
    pub max_samples: Option<u64>,

    /// Polling interval in milliseconds
    #[arg(short, long)]
    pub interval_ms: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Override `config` with the options given on the command line
    pub fn apply(&self, config: &mut ScannerConfig) {
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(max_samples) = self.max_samples {
            config.max_samples = max_samples;
        }
        if let Some(interval_ms) = self.interval_ms {
            config.session.scheduler.interval_ms = interval_ms;
        }
        config.simulate |= self.simulate;
        config.clear_codes |= self.clear_codes;
        config.json_logs |= self.json_logs;
        if self.verbose {
            config.log_level = "debug".to_string();
        }
    }

    /// Load the configuration and apply the command line on top
    pub fn load_config(&self) -> Result<ScannerConfig, ConfigError> {
        let mut config = ScannerConfig::load(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }
}

/// Scanner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Serial device of the ELM327 adapter
    pub device: String,
    /// Baud rate for serial communication
    pub baud_rate: u32,
    /// Talk to the simulated vehicle instead of an adapter
    pub simulate: bool,
    /// Clear stored trouble codes after reporting them
    pub clear_codes: bool,
    /// Stop after this many samples; 0 runs until Ctrl-C
    pub max_samples: u64,
    /// Maximum log level
    pub log_level: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Session and polling settings
    pub session: SessionConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: 38400,
            simulate: false,
            clear_codes: false,
            max_samples: 0,
            log_level: "info".to_string(),
            json_logs: false,
            session: SessionConfig::default(),
        }
    }
}

impl ScannerConfig {
    /// Load from `path` (or an optional `obd-scanner.toml`) and `OBD_*` variables.
    ///
    /// Nested keys use a double underscore: `OBD_SESSION__SCHEDULER__INTERVAL_MS`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::from_builder(config::Config::builder().add_source(file))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Connector for the configured link
    pub fn connector(&self) -> Box<dyn Connector> {
        if self.simulate {
            Box::new(SimulatedVehicle::new())
        } else {
            Box::new(Elm327Connector::new(self.device.clone(), self.baud_rate))
        }
    }
}

/// Initialize logging
pub fn init_logging(config: &ScannerConfig) -> anyhow::Result<()> {
    let level: Level = config
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", config.log_level))?;
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json_logs {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Connect, report trouble codes, then log live data until done
pub async fn run_scanner(config: ScannerConfig) -> anyhow::Result<()> {
    let session = ConnectionSession::with_connector(config.connector(), config.session.clone());
    let result = scan(&session, &config).await;

    if let Err(err) = session.disconnect().await {
        warn!("Disconnect failed: {}", err);
    }
    session.shutdown().await;
    result
}

async fn scan(session: &ConnectionSession, config: &ScannerConfig) -> anyhow::Result<()> {
    if config.simulate {
        info!("Using the simulated vehicle");
    }
    session.connect().await.context("Failed to connect")?;

    let supported = session.supported_pids().await.context("PID discovery failed")?;
    let names: Vec<&str> = supported.commands().map(|c| c.mnemonic).collect();
    info!("Vehicle supports {} PIDs: {}", supported.len(), names.join(", "));

    report_codes("Stored", session.fetch_dtcs().await?);
    report_codes("Pending", session.fetch_pending_dtcs().await?);
    if config.clear_codes {
        session.clear_dtcs().await.context("Failed to clear trouble codes")?;
        info!("Stored trouble codes cleared");
    }

    let mut events = session.subscribe();
    session.start_polling().await.context("Failed to start polling")?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let mut received = 0u64;
    loop {
        tokio::select! {
            _ = &mut interrupted => {
                info!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Sample(sample)) => {
                    log_sample(&sample);
                    received += 1;
                    if config.max_samples > 0 && received >= config.max_samples {
                        break;
                    }
                }
                Ok(SessionEvent::State(ConnectionState::Error(reason))) => {
                    bail!("Connection lost: {}", reason);
                }
                Ok(SessionEvent::State(state)) => info!("Session {}", state),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} samples", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.stop_polling().await?;
    info!("Received {} samples", received);
    Ok(())
}

fn report_codes(kind: &str, codes: Vec<DiagnosticTroubleCode>) {
    if codes.is_empty() {
        info!("{} trouble codes: none", kind);
        return;
    }
    for code in codes {
        warn!("{} trouble code {} ({:?})", kind, code, code.domain);
    }
}

fn log_sample(sample: &LiveSample) {
    match &sample.value {
        SampleValue::Value(value) => info!("{:<24} {}", sample.mnemonic, value),
        SampleValue::Unavailable(reason) => warn!("{:<24} unavailable: {}", sample.mnemonic, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use obd_scheduler::FailurePolicy;

    #[test]
    fn test_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.baud_rate, 38400);
        assert!(!config.simulate);
        assert_eq!(config.session.scheduler.interval_ms, 1000);
        assert_eq!(config.session.exchange_timeout_ms, 2000);
    }

    #[test]
    fn test_load_from_toml() {
        let toml = r#"
            device = "/dev/ttyACM0"
            simulate = true
            max_samples = 40

            [session.scheduler]
            interval_ms = 250
            failure_policy = "skip"
        "#;
        let builder = config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        let config = ScannerConfig::from_builder(builder).unwrap();

        assert_eq!(config.device, "/dev/ttyACM0");
        assert!(config.simulate);
        assert_eq!(config.max_samples, 40);
        assert_eq!(config.session.scheduler.interval_ms, 250);
        assert_eq!(config.session.scheduler.failure_policy, FailurePolicy::Skip);
        // Untouched sections keep their defaults
        assert_eq!(config.baud_rate, 38400);
        assert_eq!(config.session.event_capacity, 256);
    }

    #[test]
    fn test_missing_default_file_is_fine() {
        let config = ScannerConfig::load(None).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_explicit_file_must_exist() {
        assert!(ScannerConfig::load(Some(Path::new("does-not-exist.toml"))).is_err());
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::try_parse_from([
            "obd-scanner",
            "--simulate",
            "--device",
            "/dev/rfcomm0",
            "-n",
            "12",
            "--interval-ms",
            "500",
            "--clear-codes",
            "-v",
        ])
        .unwrap();
        let mut config = ScannerConfig::default();
        cli.apply(&mut config);

        assert!(config.simulate);
        assert!(config.clear_codes);
        assert_eq!(config.device, "/dev/rfcomm0");
        assert_eq!(config.max_samples, 12);
        assert_eq!(config.session.scheduler.interval_ms, 500);
        assert_eq!(config.log_level, "debug");
        // Not given: file values stay
        assert_eq!(config.baud_rate, 38400);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_cli_without_flags_keeps_config() {
        let cli = Cli::try_parse_from(["obd-scanner"]).unwrap();
        let mut config = ScannerConfig {
            simulate: true,
            max_samples: 7,
            ..Default::default()
        };
        cli.apply(&mut config);
        assert!(config.simulate);
        assert_eq!(config.max_samples, 7);
    }

    #[test]
    fn test_cli_help_and_bad_input() {
        let help = Cli::try_parse_from(["obd-scanner", "--help"]).unwrap_err();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);
        assert!(Cli::try_parse_from(["obd-scanner", "--max-samples", "many"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_simulated_vehicle() {
        let config = ScannerConfig {
            simulate: true,
            clear_codes: true,
            max_samples: 25,
            ..Default::default()
        };
        run_scanner(config).await.unwrap();
    }
}
