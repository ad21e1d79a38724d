//! Tracing subscriber setup for the command-line front end
//!
//! The library only emits `log` records and `tracing` spans. Applications decide
//! where they go; the `rmbg` binary installs the subscriber configured here.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Crates whose debug output drowns the pipeline's own messages
const QUIET_TARGETS: &[&str] = &["ort", "hyper", "reqwest", "rustls", "tract_core", "tract_onnx"];

/// Output format of the subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Colored, human-readable lines
    #[default]
    Console,
    /// Plain lines without ANSI colors, for CI logs
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Debug, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Explicit filter directive, takes precedence over `verbosity`
    pub env_filter: Option<String>,
    /// Logged once at startup to correlate the records of one invocation
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn verbosity_to_level(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Filter directive derived from the configuration
    ///
    /// Dependency crates stay at `warn` unless the verbosity asks for traces.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        if let Some(filter) = &self.env_filter {
            return filter.clone();
        }

        let level = self.verbosity_to_level();
        let mut directive = level.to_string();
        if self.verbosity < 2 {
            for target in QUIET_TARGETS {
                directive.push_str(&format!(",{target}=warn"));
            }
        }
        directive
    }

    /// Install the global subscriber
    ///
    /// `RUST_LOG` overrides the computed filter when set.
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) if self.env_filter.is_none() => filter,
            _ => EnvFilter::try_new(self.filter_directive())?,
        };
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(layer).try_init()?;
            },
            TracingFormat::Compact => {
                let layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "rmbg session started");
        }

        Ok(())
    }
}

/// Install the CLI subscriber with a fresh session id
///
/// # Errors
/// - See [`TracingConfig::init`]
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8, format: TracingFormat) -> anyhow::Result<()> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Spans wrapping the top-level stages of a CLI invocation
pub mod spans {
    use tracing::{Level, Span};

    pub fn session(model_id: &str, provider: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "session",
            model_id = %model_id,
            provider = %provider
        )
    }

    pub fn batch(image_count: usize) -> Span {
        tracing::span!(Level::INFO, "batch", image_count = image_count)
    }

    pub fn export(destination: &std::path::Path) -> Span {
        tracing::span!(
            Level::INFO,
            "export",
            destination = %destination.display()
        )
    }
}
