//! Server configuration
//!
//! Resolved from built-in defaults, then an optional TOML file, then
//! command-line flags. Example file:
//!
//! ```toml
//! address = "0.0.0.0"
//! port = 8443
//! certificate_file = "/etc/kubewire/tls.crt"
//! private_key_file = "/etc/kubewire/tls.key"
//! kubeconfig = "/etc/kubewire/kubeconfig"
//! subscriber_queue_capacity = 2048
//! max_backoff_secs = 30
//! ```

use crate::cache::config::{
    INITIAL_BACKOFF_SECONDS, MAX_BACKOFF_SECONDS, METRICS_POLL_SECONDS,
    SUBSCRIBER_QUEUE_CAPACITY, WATCH_TIMEOUT_SECONDS, WatcherConfig,
};
use crate::error::{Error, Result};
use clap::Parser;
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8081;

#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Multi-cluster Kubernetes event proxy", long_about = None)]
pub struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// PEM certificate chain; TLS is enabled when given with --private-key-file
    #[arg(long)]
    pub certificate_file: Option<PathBuf>,

    /// PEM private key matching --certificate-file
    #[arg(long)]
    pub private_key_file: Option<PathBuf>,

    /// Kubeconfig holding the contexts to serve
    #[arg(short, long)]
    pub kubeconfig: Option<PathBuf>,

    /// Per-session outbound queue bound
    #[arg(long)]
    pub subscriber_queue_capacity: Option<usize>,

    /// Log filter, e.g. `debug` or `kubewire=trace` (overrides `RUST_LOG`)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

/// Contents of the optional TOML file; every field may be omitted
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub certificate_file: Option<PathBuf>,
    pub private_key_file: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    pub subscriber_queue_capacity: Option<usize>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub watch_timeout_secs: Option<u32>,
    pub metrics_poll_secs: Option<u64>,
}

impl FileConfig {
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// # Errors
    ///
    /// Returns an error on invalid TOML or unknown keys
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub certificate_file: PathBuf,
    pub private_key_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub tls: Option<TlsFiles>,
    pub kubeconfig: Option<PathBuf>,
    pub subscriber_queue_capacity: usize,
    pub watcher: WatcherConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            kubeconfig: None,
            subscriber_queue_capacity: SUBSCRIBER_QUEUE_CAPACITY,
            watcher: WatcherConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Resolve the configuration for `args`, reading `--config` if given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or a value is invalid
    pub fn load(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Self::merge(file, args)
    }

    /// Defaults, overridden by `file`, overridden by `args`.
    ///
    /// # Errors
    ///
    /// Returns `Custom` when a resolved value is out of range
    pub fn merge(file: FileConfig, args: &Args) -> Result<Self> {
        let mut config = Self::default();

        config.apply_file(file);
        config.apply_args(args);
        config.validate()?;

        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(address) = file.address {
            self.address = address;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let (Some(certificate_file), Some(private_key_file)) =
            (file.certificate_file, file.private_key_file)
        {
            self.tls = Some(TlsFiles {
                certificate_file,
                private_key_file,
            });
        }
        if file.kubeconfig.is_some() {
            self.kubeconfig = file.kubeconfig;
        }
        if let Some(capacity) = file.subscriber_queue_capacity {
            self.subscriber_queue_capacity = capacity;
        }
        if let Some(secs) = file.initial_backoff_secs {
            self.watcher.initial_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = file.max_backoff_secs {
            self.watcher.max_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = file.watch_timeout_secs {
            self.watcher.watch_timeout_secs = secs;
        }
        if let Some(secs) = file.metrics_poll_secs {
            self.watcher.poll_interval = Duration::from_secs(secs);
        }
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(address) = &args.address {
            self.address.clone_from(address);
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let (Some(certificate_file), Some(private_key_file)) =
            (&args.certificate_file, &args.private_key_file)
        {
            self.tls = Some(TlsFiles {
                certificate_file: certificate_file.clone(),
                private_key_file: private_key_file.clone(),
            });
        }
        if args.kubeconfig.is_some() {
            self.kubeconfig.clone_from(&args.kubeconfig);
        }
        if let Some(capacity) = args.subscriber_queue_capacity {
            self.subscriber_queue_capacity = capacity;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Custom("port must be between 1 and 65535".to_string()));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(Error::Custom("subscriber_queue_capacity must be greater than 0".to_string()));
        }
        if self.watcher.initial_backoff.is_zero() || self.watcher.poll_interval.is_zero() {
            return Err(Error::Custom("backoff and poll periods must be greater than 0".to_string()));
        }
        if self.watcher.initial_backoff > self.watcher.max_backoff {
            return Err(Error::Custom(
                "initial_backoff_secs must not exceed max_backoff_secs".to_string(),
            ));
        }
        // the API server caps watch requests just under five minutes
        if self.watcher.watch_timeout_secs == 0 || self.watcher.watch_timeout_secs > WATCH_TIMEOUT_SECONDS {
            return Err(Error::Custom(format!(
                "watch_timeout_secs must be between 1 and {WATCH_TIMEOUT_SECONDS}"
            )));
        }
        Ok(())
    }

    /// `address:port` for the listener
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Human readable dump logged at startup
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        let _ = writeln!(summary, "listen address: {}", self.listen_address());
        let _ = writeln!(
            summary,
            "tls: {}",
            self.tls.as_ref().map_or_else(
                || "disabled".to_string(),
                |tls| format!(
                    "{} / {}",
                    tls.certificate_file.display(),
                    tls.private_key_file.display()
                )
            )
        );
        let _ = writeln!(
            summary,
            "kubeconfig: {}",
            self.kubeconfig
                .as_ref()
                .map_or_else(|| "default".to_string(), |p| p.display().to_string())
        );
        let _ = writeln!(summary, "subscriber queue capacity: {}", self.subscriber_queue_capacity);
        let _ = write!(
            summary,
            "watch timeout: {}s, backoff: {}s..{}s, metrics poll: {}s",
            self.watcher.watch_timeout_secs,
            self.watcher.initial_backoff.as_secs(),
            self.watcher.max_backoff.as_secs(),
            self.watcher.poll_interval.as_secs()
        );
        summary
    }
}

/// Validate default values at compile time
const _: () = {
    assert!(DEFAULT_PORT > 0, "DEFAULT_PORT must be greater than 0");
    assert!(INITIAL_BACKOFF_SECONDS <= MAX_BACKOFF_SECONDS);
    assert!(WATCH_TIMEOUT_SECONDS > 0 && METRICS_POLL_SECONDS > 0);
};
