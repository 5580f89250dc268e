use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "runbox")]
#[command(about = "Compile and run programs as pollable sessions over HTTP.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/runbox/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the listen address (host:port)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Override the maximum number of running sessions
    #[arg(long, value_name = "N")]
    pub max_sessions: Option<usize>,
}

impl Cli {
    /// Config file to load.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::config_path)
    }

    /// Apply command-line overrides on top of the loaded file.
    pub fn apply(&self, config: &mut Config) {
        if let Some(bind) = &self.bind {
            config.server.bind_addr = bind.clone();
        }
        if let Some(max_sessions) = self.max_sessions {
            config.sessions.max_sessions = max_sessions;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_file_values() {
        let cli = Cli::parse_from(["runbox", "--bind", "127.0.0.1:9000", "--max-sessions", "4"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.sessions.max_sessions, 4);
    }

    #[test]
    fn no_flags_keeps_config() {
        let cli = Cli::parse_from(["runbox"]);
        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config, Config::default());
        assert_eq!(cli.config_path(), Config::config_path());
    }
}
