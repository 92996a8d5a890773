//! This module contains functionality to initialise tracing Subscribers for
//! console output, file output, and OpenTelemetry OTLP trace export.
//!
//! To get started, see [`Tracing`].

use std::path::PathBuf;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::{
    Resource, propagation::TraceContextPropagator, trace::SdkTracerProvider,
};
use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, Rotation, RollingFileAppender};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

use crate::tracing::settings::*;

pub mod settings;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can be encountered when initialising [`Tracing`].
#[derive(Debug, Snafu)]
pub enum Error {
    /// Indicates that [`Tracing`] failed to install the OpenTelemetry trace exporter.
    #[snafu(display("unable to install opentelemetry trace exporter"))]
    InstallOtelTraceExporter {
        #[allow(missing_docs)]
        source: opentelemetry_otlp::ExporterBuildError,
    },

    /// Indicates that [`Tracing`] failed to install the rolling file appender.
    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender {
        #[allow(missing_docs)]
        source: InitError,
    },

    /// Indicates that [`Tracing`] failed to set the global default subscriber.
    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber {
        #[allow(missing_docs)]
        source: SetGlobalDefaultError,
    },
}

/// Initializes a set of pre-configured [`Subscriber`][1] layers.
///
/// The configured subscribers are active as long as the guard returned by [`Tracing::init`] is
/// in scope. Dropping it shuts the OTLP provider down, so bind it to a named variable (not
/// `let _ =`) and keep it alive until the process exits.
///
/// ```
/// use app_restart_telemetry::tracing::{Error, TelemetryOptions, Tracing};
///
/// # fn main() -> Result<(), Error> {
/// let _tracing_guard = Tracing::pre_configured("test", TelemetryOptions::default()).init()?;
/// tracing::info!("log a message");
/// # Ok(())
/// # }
/// ```
///
/// ## Environment Variables and CLI Arguments
///
/// - `CONSOLE_LOG_DISABLED` (`--console-log-disabled`): Disables console logs when set to `true`.
/// - `CONSOLE_LOG_LEVEL`: Set the log level for the console logs.
/// - `FILE_LOG_DIRECTORY` (`--file-log-directory`): Enable the file logs and set the file log directory.
/// - `FILE_LOG_ROTATION_PERIOD` (`--file-log-rotation-period`): Set the rotation period of log files.
/// - `FILE_LOG_LEVEL`: Set the log level for file logs.
/// - `OTEL_TRACE_EXPORTER_ENABLED` (`--otel-trace-exporter-enabled`): Enable exporting OTEL traces.
/// - `OTEL_TRACE_EXPORTER_LEVEL`: Set the log level for OTEL traces.
///
/// The exporter itself is configured through the variables defined in the opentelemetry crates,
/// e.g. `OTEL_EXPORTER_OTLP_ENDPOINT` (defaults to `http://localhost:4317`).
///
/// [1]: tracing::Subscriber
pub struct Tracing {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
    otlp_trace_settings: OtlpTraceSettings,

    tracer_provider: Option<SdkTracerProvider>,
}

impl Tracing {
    /// The environment variable used to set the console log level filter.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// The environment variable used to set the rolling file log level filter.
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    /// The filename used for the rolling file logs.
    pub const FILE_LOG_SUFFIX: &str = "tracing-rs.json";
    /// The environment variable used to set the OTEL trace level filter.
    pub const OTEL_TRACE_EXPORTER_LEVEL: &str = "OTEL_TRACE_EXPORTER_LEVEL";

    /// Creates an instance with every subscriber disabled.
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            console_log_settings: ConsoleLogSettings::Disabled,
            file_log_settings: FileLogSettings::Disabled,
            otlp_trace_settings: OtlpTraceSettings::Disabled,
            tracer_provider: None,
        }
    }

    /// Creates an instance from [`TelemetryOptions`], all subscribers defaulting to INFO.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            file_log_directory,
            file_log_rotation_period,
            otel_trace_exporter_enabled,
        } = options;

        Self::new(service_name)
            .with_console_output((
                Self::CONSOLE_LOG_LEVEL,
                LevelFilter::INFO,
                !console_log_disabled,
            ))
            .with_file_output(file_log_directory.map(|file_log_dir| FileLogOutput {
                common_settings: Settings::new(Self::FILE_LOG_LEVEL, LevelFilter::INFO),
                file_log_dir,
                rotation_period: file_log_rotation_period.unwrap_or_default().into(),
                filename_suffix: Self::FILE_LOG_SUFFIX.to_owned(),
            }))
            .with_otlp_trace_exporter((
                Self::OTEL_TRACE_EXPORTER_LEVEL,
                LevelFilter::INFO,
                otel_trace_exporter_enabled,
            ))
    }

    pub fn with_console_output(mut self, settings: impl Into<ConsoleLogSettings>) -> Self {
        self.console_log_settings = settings.into();
        self
    }

    pub fn with_file_output(mut self, settings: impl Into<FileLogSettings>) -> Self {
        self.file_log_settings = settings.into();
        self
    }

    pub fn with_otlp_trace_exporter(mut self, settings: impl Into<OtlpTraceSettings>) -> Self {
        self.otlp_trace_settings = settings.into();
        self
    }

    /// Initialize the configured tracing subscribers, returning a guard that
    /// will shutdown the subscribers when dropped.
    pub fn init(mut self) -> Result<Self> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let ConsoleLogSettings::Enabled { common_settings } = &self.console_log_settings {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if let FileLogSettings::Enabled {
            common_settings,
            file_log_dir,
            rotation_period,
            filename_suffix,
        } = &self.file_log_settings
        {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );

            let file_appender = RollingFileAppender::builder()
                .rotation(rotation_period.clone())
                .filename_prefix(self.service_name.to_string())
                .filename_suffix(filename_suffix)
                .max_log_files(6)
                .build(file_log_dir)
                .context(InitRollingFileAppenderSnafu)?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if let OtlpTraceSettings::Enabled { common_settings } = &self.otlp_trace_settings {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            )
            // The gRPC transport traces through tracing itself, which would feed back into the exporter
            .add_directive("h2=off".parse().expect("invalid directive"));

            let trace_exporter = SpanExporter::builder()
                .with_tonic()
                .build()
                .context(InstallOtelTraceExporterSnafu)?;

            let tracer_provider = SdkTracerProvider::builder()
                .with_batch_exporter(trace_exporter)
                .with_resource(
                    Resource::builder()
                        .with_service_name(self.service_name)
                        .build(),
                )
                .build();

            let tracer = tracer_provider.tracer(self.service_name);

            layers.push(
                tracing_opentelemetry::layer()
                    .with_tracer(tracer)
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
            self.tracer_provider = Some(tracer_provider);

            opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        // IMPORTANT: we must return self, otherwise Drop will be called and uninitialise tracing
        Ok(self)
    }
}

impl Drop for Tracing {
    fn drop(&mut self) {
        if let Some(tracer_provider) = &self.tracer_provider {
            tracing::debug!("shutting down opentelemetry OTLP trace provider");

            if let Err(error) = tracer_provider.shutdown() {
                tracing::error!(%error, "unable to shutdown TracerProvider");
            }
        }
    }
}

/// Create an [`EnvFilter`] configured with the given environment variable and default [`Directive`].
fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

/// Contains options which can be passed to [`Tracing::pre_configured()`].
///
/// With the `clap` feature enabled this struct can be flattened into CLI arguments.
#[cfg_attr(feature = "clap", derive(clap::Args))]
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,

    /// Enable exporting OTEL traces via OTLP.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub otel_trace_exporter_enabled: bool,
}

/// Supported periods when the log file is rolled over.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
#[allow(missing_docs)]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    #[test]
    fn new_disables_everything() {
        let tracing = Tracing::new("test");

        assert_eq!(tracing.service_name, "test");
        assert!(tracing.console_log_settings.is_disabled());
        assert!(tracing.file_log_settings.is_disabled());
        assert!(tracing.otlp_trace_settings.is_disabled());
    }

    #[test]
    fn pre_configured_defaults() {
        let tracing = Tracing::pre_configured("test", TelemetryOptions::default());

        assert_eq!(
            tracing.console_log_settings,
            ConsoleLogSettings::Enabled {
                common_settings: Settings::new(Tracing::CONSOLE_LOG_LEVEL, LevelFilter::INFO),
            }
        );
        assert!(tracing.file_log_settings.is_disabled());
        assert!(tracing.otlp_trace_settings.is_disabled());
    }

    #[test]
    fn pre_configured_with_file_output() {
        let tracing = Tracing::pre_configured("test", TelemetryOptions {
            console_log_disabled: true,
            file_log_directory: Some(PathBuf::from("/tmp/logs")),
            file_log_rotation_period: Some(RotationPeriod::Hourly),
            otel_trace_exporter_enabled: true,
        });

        assert!(tracing.console_log_settings.is_disabled());
        assert_eq!(tracing.file_log_settings, FileLogSettings::Enabled {
            common_settings: Settings::new(Tracing::FILE_LOG_LEVEL, LevelFilter::INFO),
            file_log_dir: PathBuf::from("/tmp/logs"),
            rotation_period: Rotation::HOURLY,
            filename_suffix: Tracing::FILE_LOG_SUFFIX.to_owned(),
        });
        assert!(tracing.otlp_trace_settings.is_enabled());
    }

    #[rstest]
    #[case(RotationPeriod::Minutely, Rotation::MINUTELY)]
    #[case(RotationPeriod::Daily, Rotation::DAILY)]
    #[case(RotationPeriod::Never, Rotation::NEVER)]
    fn rotation_period_conversion(#[case] period: RotationPeriod, #[case] expected: Rotation) {
        assert_eq!(Rotation::from(period), expected);
    }
}
