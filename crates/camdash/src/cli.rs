//! Command-line interface for camdash

use argh::FromArgs;
use std::path::PathBuf;

/// Multi-camera USB capture with hotplug and adaptive frame rate
#[derive(FromArgs, Debug)]
pub struct CamdashArgs {
    /// path to the config file (default: $CAMDASH_CONFIG or config.yaml)
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    /// log level (DEBUG, INFO, WARNING, ERROR, CRITICAL), overrides the config file
    #[argh(option, short = 'l', from_str_fn(parse_log_level))]
    pub log_level: Option<String>,

    /// validate the config file and exit
    #[argh(switch)]
    pub validate: bool,

    /// list detected cameras and exit
    #[argh(switch)]
    pub list_devices: bool,
}

/// Accept the level names the config file accepts
fn parse_log_level(s: &str) -> Result<String, String> {
    let level = s.trim().to_ascii_uppercase();
    match level.as_str() {
        "TRACE" | "DEBUG" | "INFO" | "WARN" | "WARNING" | "ERROR" | "CRITICAL" | "OFF" => {
            Ok(level)
        }
        _ => Err(format!(
            "Invalid log level '{}'. Expected one of DEBUG, INFO, WARNING, ERROR, CRITICAL",
            s
        )),
    }
}
