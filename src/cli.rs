use clap::Parser;
use std::path::PathBuf;

/// totemd: hardware control daemon for the Totem device
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: $TOTEM_CONFIG, ~/.config/totem/config.yml, /etc/totem/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Detach from the terminal and log to syslog
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Report whether a daemon is running, clearing stale files
    #[arg(long, conflicts_with_all = ["stop", "daemonize"])]
    pub status: bool,

    /// Send SIGTERM to the running daemon
    #[arg(long, conflicts_with = "daemonize")]
    pub stop: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from(["totemd", "-c", "/tmp/totem.yml", "-d"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/totem.yml")));
        assert!(cli.daemonize);
        assert!(!cli.status);
    }

    #[test]
    fn status_and_stop_are_exclusive() {
        assert!(Cli::try_parse_from(["totemd", "--status", "--stop"]).is_err());
        assert!(Cli::try_parse_from(["totemd", "--stop"]).unwrap().stop);
    }
}
