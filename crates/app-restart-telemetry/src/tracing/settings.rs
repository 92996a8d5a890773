//! Subscriber settings.

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::Rotation;

/// General settings that apply to any subscriber.
#[derive(Debug, PartialEq, Eq)]
pub struct Settings {
    /// The environment variable used to set the [`LevelFilter`].
    ///
    /// When the environment variable is set, it will override what is set by
    /// [`Self::default_level`].
    pub environment_variable: &'static str,

    /// The [`LevelFilter`] to fallback to if [`Self::environment_variable`] has
    /// not been set.
    pub default_level: LevelFilter,
}

impl Settings {
    pub fn new(environment_variable: &'static str, default_level: LevelFilter) -> Self {
        Self {
            environment_variable,
            default_level,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new("RUST_LOG", LevelFilter::INFO)
    }
}

/// Console log subscriber settings.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum ConsoleLogSettings {
    #[default]
    Disabled,
    Enabled { common_settings: Settings },
}

/// Rolling JSON file subscriber settings.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum FileLogSettings {
    #[default]
    Disabled,
    Enabled {
        common_settings: Settings,
        file_log_dir: PathBuf,
        rotation_period: Rotation,
        filename_suffix: String,
    },
}

/// OTLP trace exporter settings.
#[derive(Debug, Default, PartialEq, Eq)]
pub enum OtlpTraceSettings {
    #[default]
    Disabled,
    Enabled { common_settings: Settings },
}

macro_rules! impl_enabled_checks {
    ($($ty:ty),+) => {
        $(
            impl $ty {
                pub fn is_enabled(&self) -> bool {
                    !matches!(self, Self::Disabled)
                }

                pub fn is_disabled(&self) -> bool {
                    matches!(self, Self::Disabled)
                }
            }
        )+
    };
}

impl_enabled_checks!(ConsoleLogSettings, FileLogSettings, OtlpTraceSettings);

impl From<(&'static str, LevelFilter)> for ConsoleLogSettings {
    fn from((environment_variable, default_level): (&'static str, LevelFilter)) -> Self {
        Self::Enabled {
            common_settings: Settings::new(environment_variable, default_level),
        }
    }
}

impl From<(&'static str, LevelFilter, bool)> for ConsoleLogSettings {
    fn from(
        (environment_variable, default_level, enabled): (&'static str, LevelFilter, bool),
    ) -> Self {
        if enabled {
            (environment_variable, default_level).into()
        } else {
            Self::Disabled
        }
    }
}

impl From<(&'static str, LevelFilter, bool)> for OtlpTraceSettings {
    fn from(
        (environment_variable, default_level, enabled): (&'static str, LevelFilter, bool),
    ) -> Self {
        if enabled {
            Self::Enabled {
                common_settings: Settings::new(environment_variable, default_level),
            }
        } else {
            Self::Disabled
        }
    }
}

impl From<Option<FileLogOutput>> for FileLogSettings {
    fn from(value: Option<FileLogOutput>) -> Self {
        value.map_or(Self::Disabled, Into::into)
    }
}

/// Everything needed to enable the rolling file subscriber.
pub struct FileLogOutput {
    pub common_settings: Settings,
    pub file_log_dir: PathBuf,
    pub rotation_period: Rotation,
    pub filename_suffix: String,
}

impl From<FileLogOutput> for FileLogSettings {
    fn from(value: FileLogOutput) -> Self {
        Self::Enabled {
            common_settings: value.common_settings,
            file_log_dir: value.file_log_dir,
            rotation_period: value.rotation_period,
            filename_suffix: value.filename_suffix,
        }
    }
}
