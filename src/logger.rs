use std::env;

use crate::prelude::*;
use simplelog::{CombinedLogger, ConfigBuilder, SharedLogger};

pub const LOG_ENV: &str = "SELVA_INSPECT_LOG";

fn log_level() -> log::LevelFilter {
    env::var(LOG_ENV)
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info)
}

/// Terminal logger writing to stderr, so that inspected values on stdout stay
/// clean when they are piped.
pub fn get_local_logger() -> Box<dyn SharedLogger> {
    let config = ConfigBuilder::new()
        .set_time_level(log::LevelFilter::Debug)
        .build();

    simplelog::TermLogger::new(
        log_level(),
        config,
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )
}

pub fn init_local_logger() -> Result<()> {
    CombinedLogger::init(vec![get_local_logger()])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_env() {
        temp_env::with_var(LOG_ENV, Some("trace"), || {
            assert_eq!(log_level(), log::LevelFilter::Trace)
        });
        temp_env::with_var(LOG_ENV, Some("not-a-level"), || {
            assert_eq!(log_level(), log::LevelFilter::Info)
        });
        temp_env::with_var_unset(LOG_ENV, || assert_eq!(log_level(), log::LevelFilter::Info));
    }
}
