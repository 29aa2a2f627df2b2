use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Info,
    Debug,
}

impl LogLevel {
    /// `--quiet` wins over `--debug`.
    pub fn from_flags(debug: bool, quiet: bool) -> Self {
        match (debug, quiet) {
            (_, true) => LogLevel::Off,
            (true, false) => LogLevel::Debug,
            (false, false) => LogLevel::Info,
        }
    }

    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_from_flags() {
        assert_eq!(LogLevel::from_flags(false, false), LogLevel::Info);
        assert_eq!(LogLevel::from_flags(true, false), LogLevel::Debug);
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Off);
        assert_eq!(LogLevel::Off.as_filter(), LevelFilter::OFF);
    }
}
