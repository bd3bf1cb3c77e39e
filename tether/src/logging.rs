use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

pub const LOG_LEVEL_OFF: u8 = 0;
pub const LOG_LEVEL_ERROR: u8 = 1;
pub const LOG_LEVEL_WARN: u8 = 2;
pub const LOG_LEVEL_INFO: u8 = 3;
pub const LOG_LEVEL_DEBUG: u8 = 4;
pub const LOG_LEVEL_TRACE: u8 = 5;

fn level_filter(level: u8) -> Option<LevelFilter> {
    Some(match level {
        LOG_LEVEL_OFF => LevelFilter::Off,
        LOG_LEVEL_ERROR => LevelFilter::Error,
        LOG_LEVEL_WARN => LevelFilter::Warn,
        LOG_LEVEL_INFO => LevelFilter::Info,
        LOG_LEVEL_DEBUG => LevelFilter::Debug,
        LOG_LEVEL_TRACE => LevelFilter::Trace,
        _ => return None,
    })
}

/// Install a terminal logger writing to stderr at the given level.
///
/// This function is optional, if it is not called then no logger is installed. Unknown levels
/// and repeated calls are ignored.
pub fn init_logging(level: u8) {
    let Some(filter) = level_filter(level) else {
        return;
    };

    TermLogger::init(
        filter,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .ok();
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(LOG_LEVEL_OFF, Some(LevelFilter::Off))]
    #[case(LOG_LEVEL_DEBUG, Some(LevelFilter::Debug))]
    #[case(LOG_LEVEL_TRACE, Some(LevelFilter::Trace))]
    #[case(6, None)]
    fn levels(#[case] level: u8, #[case] filter: Option<LevelFilter>) {
        assert_eq!(level_filter(level), filter);
    }
}
