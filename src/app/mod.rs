use crate::{
    cli::RunOptions,
    config::{data_file_for, MenuLayout, DEFAULT_INPUT_DEVICE, DEFAULT_SERIAL_DEVICE},
    Error, Result,
};
use std::path::{Path, PathBuf};

mod lifecycle;
mod logger;
pub mod supervisor;

pub use logger::{LogLevel, Logger};
pub use supervisor::{Session, SessionEnd, Supervisor};

/// Config for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Input event node, or `gpio`.
    pub input: String,
    /// Display serial port or `/dev/i2c-N`.
    pub serial: String,
    pub config_path: Option<PathBuf>,
    /// Where persisted module state lives; `None` keeps it in memory only.
    pub persistent_file: Option<PathBuf>,
    pub auto_detect: bool,
    pub power_save: bool,
    pub log_level: LogLevel,
    pub log_file: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT_DEVICE.to_string(),
            serial: DEFAULT_SERIAL_DEVICE.to_string(),
            config_path: None,
            persistent_file: None,
            auto_detect: true,
            power_save: false,
            log_level: LogLevel::default(),
            log_file: None,
        }
    }
}

impl AppConfig {
    /// Merge CLI options over the loaded layout and the built-in defaults.
    pub fn from_sources(layout: &MenuLayout, opts: RunOptions) -> Self {
        let auto_detect = opts.wants_auto_detect();
        let config_path = opts.config.map(PathBuf::from);
        let persistent_file = layout
            .persistent_file
            .clone()
            .or_else(|| config_path.as_deref().map(data_file_for));
        Self {
            input: opts
                .input
                .unwrap_or_else(|| DEFAULT_INPUT_DEVICE.to_string()),
            serial: opts
                .serial
                .unwrap_or_else(|| DEFAULT_SERIAL_DEVICE.to_string()),
            config_path,
            persistent_file,
            auto_detect,
            power_save: opts.power_save,
            log_level: level_for(opts.verbose),
            log_file: opts.log_file,
        }
    }
}

fn level_for(verbose: bool) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        LogLevel::default()
    }
}

pub struct App {
    config: AppConfig,
    layout: MenuLayout,
    logger: Logger,
}

impl App {
    pub fn new(config: AppConfig, layout: MenuLayout) -> Self {
        let logger = Logger::new(config.log_level, config.log_file.clone());
        Self {
            config,
            layout,
            logger,
        }
    }

    pub fn from_options(opts: RunOptions) -> Result<Self> {
        if opts.input.as_deref() == Some("") || opts.serial.as_deref() == Some("") {
            return Err(Error::InvalidArgs(
                "device path cannot be empty".to_string(),
            ));
        }
        let logger = Logger::new(level_for(opts.verbose), opts.log_file.clone());
        let layout = match opts.config.as_deref() {
            Some(path) => MenuLayout::load_or_default(Path::new(path), &logger),
            None => MenuLayout::default(),
        };
        let config = AppConfig::from_sources(&layout, opts);
        Ok(Self {
            config,
            layout,
            logger,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn layout(&self) -> &MenuLayout {
        &self.layout
    }

    /// Entry point for the daemon: install the signal handler and hand over to the supervisor.
    pub fn run(self) -> Result<()> {
        let running = lifecycle::create_shutdown_flag()?;
        self.logger.info(format!(
            "micropanel {} start (input={}, serial={}, auto-detect={}, power-save={})",
            env!("CARGO_PKG_VERSION"),
            self.config.input,
            self.config.serial,
            self.config.auto_detect,
            self.config.power_save
        ));
        if let Some(path) = &self.config.persistent_file {
            self.logger
                .info(format!("using persistent data file: {}", path.display()));
        }
        let mut supervisor = Supervisor::new(self.config, self.layout, self.logger.clone());
        let outcome = supervisor.run(&running);
        self.logger.info("micropanel stopped");
        outcome
    }
}
