use clap::Parser;
use std::path::PathBuf;

/// Student marks tracker sidecar: JSON requests on stdin, one response per line on stdout.
#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Workspace directory to open at startup.
    #[arg(long, env = "MARKTRACKD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Log at info level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

/// Logs go to stderr; stdout carries the IPC stream.
pub fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.default_log_filter()),
    )
    .target(env_logger::Target::Stderr)
    .init();
}
