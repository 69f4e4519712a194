//! Configuration for the heapscope probe.
//!
//! Everything is optional: a missing section (or a missing file) yields the
//! defaults, which serve on the well-known port and skip private types.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

/// Well-known TCP port of the probe.
pub const DEFAULT_PORT: u16 = 31448;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "HEAPSCOPE_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_host() -> String {
        "127.0.0.1".to_owned()
    }

    fn default_port() -> u16 {
        DEFAULT_PORT
    }

    /// `host:port` string suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Take a protective hold on strongly referenced objects for the lifetime
    /// of the session. When disabled, strong references are treated like
    /// unretained ones.
    #[serde(default = "SweepConfig::default_retain_objects")]
    pub retain_objects: bool,

    /// Superclass chains stop before this type.
    #[serde(default = "SweepConfig::default_root_base_type")]
    pub root_base_type: String,

    /// Type-name patterns that are never swept. `^` anchors at the start, `$`
    /// at the end; anything else is a substring match.
    #[serde(default = "SweepConfig::default_exclusions")]
    pub exclusions: Vec<String>,

    /// Additional type names rendered as leaves without field expansion.
    #[serde(default)]
    pub leaf_types: Vec<String>,
}

impl SweepConfig {
    fn default_retain_objects() -> bool {
        true
    }

    fn default_root_base_type() -> String {
        "Object".to_owned()
    }

    fn default_exclusions() -> Vec<String> {
        vec!["^_".to_owned()]
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            retain_objects: Self::default_retain_objects(),
            root_base_type: Self::default_root_base_type(),
            exclusions: Self::default_exclusions(),
            leaf_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// Exclusions applied to offline snapshots instead of `sweep.exclusions`.
    #[serde(default = "SnapshotConfig::default_exclusions")]
    pub exclusions: Vec<String>,
}

impl SnapshotConfig {
    fn default_exclusions() -> Vec<String> {
        vec!["^_".to_owned(), "Internal$".to_owned()]
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            exclusions: Self::default_exclusions(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive
    /// string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to this file. If it cannot be opened, file logging is
    /// skipped and the other sinks stay active.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            "off" | "none" => "off".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Effective filter: the configured level merged with `RUST_LOG`.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        match env_directives {
            Some(env_directives) => {
                let config_directives = Self::normalize_level_directives(&self.level);
                tracing_subscriber::EnvFilter::try_new(format!(
                    "{config_directives},{env_directives}"
                ))
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep the message and drop the source snippet.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl ProbeConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    /// Load from `path` if given, else from `$HEAPSCOPE_CONFIG`, else defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load_from_path(PathBuf::from(path)),
            _ => Ok(Self::default()),
        }
    }
}

struct FileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        FileWriter {
            guard: self.file.lock(),
        }
    }
}

struct FileWriter<'a> {
    guard: MutexGuard<'a, std::fs::File>,
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `TestWriter` keeps `cargo test` output captured in debug builds.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            make_writer = BoxMakeWriter::new(make_writer.and(FileMakeWriter {
                file: Arc::new(Mutex::new(file)),
            }));
        }

        let layer: Box<dyn Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target: "heapscope.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}

/// [`init_tracing`] from a full config.
pub fn init_tracing_with_config(config: &ProbeConfig) {
    init_tracing(&config.logging);
}
