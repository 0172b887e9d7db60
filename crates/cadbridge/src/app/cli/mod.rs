use crate::settings::{Settings, SETTINGS_FILENAME};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "cadbridge")]
#[command(about = "Mirror a CAD server's object graph into a headless scene", long_about = None)]
pub struct Args {
    /// Server address (host:port), overrides the settings file
    #[arg(short, long)]
    pub server: Option<String>,

    /// Path to the settings file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Subscribe to all changes once connected
    #[arg(long)]
    pub subscribe: bool,

    /// Request a full listing once connected
    #[arg(long)]
    pub refresh: bool,

    /// Seconds to run before disconnecting; runs until the server goes away when omitted
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Interval between event queue drains in milliseconds
    #[arg(long, default_value = "50")]
    pub tick_ms: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    /// Settings file to read, defaulting to the working directory
    pub fn settings_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILENAME))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn run_time(&self) -> Option<Duration> {
        self.duration.map(Duration::from_secs)
    }

    /// Apply command line overrides on top of loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(server) = &self.server {
            settings.server.address = server.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["cadbridge"]).unwrap();
        assert!(args.server.is_none());
        assert!(!args.subscribe);
        assert_eq!(args.tick_interval(), Duration::from_millis(50));
        assert_eq!(args.settings_path(), PathBuf::from(SETTINGS_FILENAME));
        assert!(args.run_time().is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::try_parse_from([
            "cadbridge",
            "--server",
            "10.1.1.1:8980",
            "--config",
            "/tmp/bridge.toml",
            "--subscribe",
            "--refresh",
            "--duration",
            "3",
            "--tick-ms",
            "0",
        ])
        .unwrap();

        let mut settings = Settings::default();
        args.apply(&mut settings);
        assert_eq!(settings.server.address, "10.1.1.1:8980");
        assert_eq!(args.settings_path(), PathBuf::from("/tmp/bridge.toml"));
        assert!(args.subscribe && args.refresh);
        assert_eq!(args.run_time(), Some(Duration::from_secs(3)));
        assert_eq!(args.tick_interval(), Duration::from_millis(1));
    }
}
