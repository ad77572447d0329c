//! Logging configuration for scoped-dic
//!
//! The container emits `tracing` events under the `scoped_dic` target:
//! container creation, object builds, cache hits, parent delegation, unscoped
//! chains and teardown. This module installs a `tracing-subscriber` to print
//! them in JSON (production) or pretty (development) form.
//!
//! # Features
//!
//! - `logging` - Emit events (default)
//! - `logging-json` - Use JSON structured output (recommended for production)
//! - `logging-pretty` - Use colorful pretty output (recommended for development)
//!
//! # Example
//!
//! ```rust,ignore
//! use scoped_dic::logging;
//!
//! // Initialize with default settings (JSON if logging-json, pretty if logging-pretty)
//! logging::init();
//!
//! // Or use builder for custom configuration
//! logging::builder()
//!     .trace()
//!     .container_only()
//!     .with_thread_names()
//!     .pretty()
//!     .init();
//! ```

use tracing::Level;

/// Target of every event emitted by the container.
pub const TARGET: &str = "scoped_dic";

/// Logging format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging (production default)
    #[default]
    Json,
    /// Pretty colorful output (development)
    Pretty,
    /// Compact single-line output
    Compact,
}

/// Builder for logging configuration
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    directives: Vec<String>,
    from_env: bool,
    with_file: bool,
    with_line_number: bool,
    with_thread_ids: bool,
    with_thread_names: bool,
}

impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            directives: Vec::new(),
            from_env: false,
            with_file: false,
            with_line_number: false,
            with_thread_ids: false,
            with_thread_names: false,
        }
    }
}

impl LoggingBuilder {
    /// Create a new logging builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set log level to TRACE, which includes cache hits and parent delegation
    pub fn trace(self) -> Self {
        self.with_level(Level::TRACE)
    }

    /// Set log level to DEBUG
    pub fn debug(self) -> Self {
        self.with_level(Level::DEBUG)
    }

    /// Set log level to INFO
    pub fn info(self) -> Self {
        self.with_level(Level::INFO)
    }

    /// Set log level to WARN, which keeps close hook failures only
    pub fn warn(self) -> Self {
        self.with_level(Level::WARN)
    }

    /// Set log level to ERROR
    pub fn error(self) -> Self {
        self.with_level(Level::ERROR)
    }

    /// Filter to only show logs from a specific target
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show container logs
    pub fn container_only(self) -> Self {
        self.with_target_filter(TARGET)
    }

    /// Add a raw `EnvFilter` directive such as `"hyper=warn"`.
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Prefer the `RUST_LOG` environment variable when it is set.
    pub fn from_env(mut self) -> Self {
        self.from_env = true;
        self
    }

    /// Include file names in log output
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in log output
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    /// Include thread IDs in log output
    pub fn with_thread_ids(mut self) -> Self {
        self.with_thread_ids = true;
        self
    }

    /// Include thread names in log output
    pub fn with_thread_names(mut self) -> Self {
        self.with_thread_names = true;
        self
    }

    /// Use JSON structured logging format
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    /// Use pretty colorful logging format
    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    /// Use compact single-line logging format
    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Filter directives in `EnvFilter` syntax.
    fn filter_directives(&self) -> String {
        let base = match self.target {
            Some(target) => format!("{}={}", target, self.level),
            None => self.level.to_string(),
        };
        std::iter::once(base)
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Install the subscriber, failing if one is already installed.
    ///
    /// Requires either `logging-json` or `logging-pretty` feature to be enabled.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn try_init(self) -> Result<(), tracing_subscriber::util::TryInitError> {
        use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

        let filter = if self.from_env {
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
        } else {
            EnvFilter::new(self.filter_directives())
        };

        let layer = fmt::layer()
            .with_file(self.with_file)
            .with_line_number(self.with_line_number)
            .with_thread_ids(self.with_thread_ids)
            .with_thread_names(self.with_thread_names)
            .with_target(true);

        let layer: Box<dyn Layer<Registry> + Send + Sync> = match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => layer.json().boxed(),
            // Fall back to the default text format if json is not enabled
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => layer.boxed(),
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().boxed(),
        };

        tracing_subscriber::registry()
            .with(layer)
            .with(filter)
            .try_init()
    }

    /// Install the subscriber, keeping any subscriber already installed.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        if let Err(err) = self.try_init() {
            tracing::warn!(target: TARGET, error = %err, "Logging already initialized");
        }
    }

    /// Initialize (no-op when subscriber features not available)
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {
        // Requires logging-json or logging-pretty
    }
}

/// Create a new logging builder
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize logging with default settings
///
/// Uses JSON format if `logging-json` feature is enabled,
/// otherwise uses pretty format if `logging-pretty` is enabled.
pub fn init() {
    #[cfg(feature = "logging-json")]
    init_json();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    init_pretty();
}

/// Initialize JSON structured logging
///
/// # Example output
/// ```json
/// {"timestamp":"2024-01-01T00:00:00.000Z","level":"DEBUG","fields":{"message":"Creating sub-container","container_id":2,"parent_id":1,"scope":"request","depth":1},"target":"scoped_dic"}
/// ```
pub fn init_json() {
    builder().json().debug().init();
}

/// Initialize pretty colorful logging
///
/// # Example output
/// ```text
///   2024-01-01T00:00:00.000Z DEBUG scoped_dic: Building object, name: "db", container_id: 1, scope: "app"
/// ```
pub fn init_pretty() {
    builder().pretty().debug().init();
}

/// Initialize logging for the container only (filters other crates)
pub fn init_container_only() {
    builder().container_only().debug().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let builder = LoggingBuilder::default();
        assert_eq!(builder.level, Level::DEBUG);
        assert_eq!(builder.format, LogFormat::Json);
        assert!(builder.target.is_none());
        assert_eq!(builder.filter_directives(), "DEBUG");
    }

    #[test]
    fn test_builder_chain() {
        let builder = LoggingBuilder::new()
            .trace()
            .pretty()
            .with_file()
            .with_line_number()
            .container_only();

        assert_eq!(builder.level, Level::TRACE);
        assert_eq!(builder.format, LogFormat::Pretty);
        assert!(builder.with_file);
        assert!(builder.with_line_number);
        assert_eq!(builder.target, Some("scoped_dic"));
        assert_eq!(builder.filter_directives(), "scoped_dic=TRACE");
    }

    #[test]
    fn test_extra_directives() {
        let builder = builder()
            .warn()
            .with_directive("hyper=info")
            .with_directive("tower=off");
        assert_eq!(builder.filter_directives(), "WARN,hyper=info,tower=off");
    }
}
