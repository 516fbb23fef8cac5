use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "FleetLock reboot-slot coordinator", long_about = None)]
pub struct Cli {
    /// Address the HTTP server listens on.
    #[arg(long, env = "FLEETLOCK_ADDRESS", default_value = "0.0.0.0:8080")]
    pub address: String,

    /// Log level: trace, debug, info, warn or error.
    #[arg(long, env = "FLEETLOCK_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Hour (0-23) the maintenance window opens. Equal to `--maintenance-window-stop` disables it.
    #[arg(long, env = "FLEETLOCK_MAINTENANCE_WINDOW_START", default_value_t = 0)]
    pub maintenance_window_start: u8,

    /// Hour (0-23) the maintenance window closes.
    #[arg(long, env = "FLEETLOCK_MAINTENANCE_WINDOW_STOP", default_value_t = 0)]
    pub maintenance_window_stop: u8,
}

impl Cli {
    /// Validates fields that `clap` cannot express with its own parser constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !matches!(
            self.log_level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("invalid log level: {}", self.log_level);
        }
        if self.maintenance_window_start > 23 {
            anyhow::bail!(
                "invalid maintenance window start hour: {}",
                self.maintenance_window_start
            );
        }
        if self.maintenance_window_stop > 23 {
            anyhow::bail!(
                "invalid maintenance window stop hour: {}",
                self.maintenance_window_stop
            );
        }
        Ok(())
    }
}
