use env_logger::{Builder, Env};
use log::LevelFilter;

/// Initializes logging, honoring `RUST_LOG` over the given default.
pub fn setup_logger(level: Option<LevelFilter>) -> Result<(), String> {
    let env = Env::default().default_filter_or(level_to_string(level.unwrap_or(LevelFilter::Info)));

    let mut builder = Builder::from_env(env);

    builder
        .try_init()
        .map_err(|e| format!("Logger init failed: {}", e))?;

    Ok(())
}

/// Maps a level filter to its env_logger string.
fn level_to_string(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Parses a level filter from a config string.
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter, String> {
    match level_str.to_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(format!("Invalid log level: {}", level_str)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(parse_log_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert!(parse_log_level("loud").is_err());
    }
}
