use std::path::PathBuf;

use clap::Parser;

/// Run a cooperative mainloop with the demo tasks from a config file.
///
/// The loop runs on the main thread until Ctrl-C or until `--duration-ms`
/// elapses, then reports what it executed.
#[derive(Parser, Debug)]
#[command(name = "mainloop-runner", about = "Run a demo cooperative mainloop")]
pub struct CliArgs {
    /// Path to a runner TOML config (built-in demo tasks when unset)
    #[arg(long, env = "MAINLOOP_RUNNER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Stop after this many milliseconds instead of waiting for Ctrl-C
    #[arg(long, env = "MAINLOOP_RUNNER_DURATION_MS")]
    pub duration_ms: Option<u64>,

    /// Print final stats as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
