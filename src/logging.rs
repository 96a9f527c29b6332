//! Logger setup: syslog when detached, stderr otherwise.

use anyhow::{Result, anyhow};
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

pub const PROCESS_NAME: &str = "totemd";

pub fn init(to_syslog: bool, filter: LevelFilter) -> Result<()> {
    if to_syslog {
        init_syslog(filter)
    } else {
        env_logger::Builder::new()
            .filter_level(filter)
            .parse_default_env()
            .try_init()
            .map_err(|e| anyhow!("{e}"))
    }
}

fn init_syslog(filter: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: PROCESS_NAME.into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(filter))
            .map_err(|e| anyhow!("{e}"))
    })
}
