pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod errors;
pub mod fetcher;
pub mod hotkeys;
pub mod layout;
pub mod log_retention;
pub mod logging;
pub mod progress;
pub mod rate_limit;
pub mod records;
pub mod refresh;
pub mod runtime;
pub mod sheets;
pub mod snapshot;
pub mod tui;
#[cfg(test)]
mod test_http;

use clap::{error::ErrorKind, Parser};
use config::{CliOverrides, ConfigSource, EnvMap};
use errors::CampboardError;
use refresh::{RefreshLoop, RefreshOptions};
use runtime::ProductionRuntime;

#[derive(Debug, Clone, Parser)]
#[command(name = "campboard")]
#[command(about = "Live progress board for items tracked in a Google Sheet")]
pub struct Cli {
    #[arg(long)]
    pub config: Option<std::path::PathBuf>,
    #[arg(long)]
    pub sheet_id: Option<String>,
    #[arg(long)]
    pub sheet_name: Option<String>,
    /// Seconds between refresh ticks.
    #[arg(long)]
    pub interval: Option<u64>,
    /// Seconds before a sheet or token request is abandoned.
    #[arg(long)]
    pub request_timeout: Option<u64>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub log_path: Option<std::path::PathBuf>,
    /// Run a single refresh tick and exit.
    #[arg(long, default_value_t = false)]
    pub once: bool,
    #[arg(long, conflicts_with = "once")]
    pub max_ticks: Option<u64>,
}

pub fn run() -> Result<i32, CampboardError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = std::env::vars_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| CampboardError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &env, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    env: &[(std::ffi::OsString, std::ffi::OsString)],
    cwd: &std::path::Path,
    runtime: &ProductionRuntime,
) -> Result<i32, CampboardError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(CampboardError::Cli(error.to_string())),
        },
    };

    let source = ConfigSource {
        overrides: CliOverrides {
            config_path: cli.config.clone(),
            title: cli.title.clone(),
            sheet_id: cli.sheet_id.clone(),
            sheet_name: cli.sheet_name.clone(),
            interval_seconds: cli.interval,
            request_timeout_seconds: cli.request_timeout,
            log_path: cli.log_path.clone(),
        },
        env: env_to_map(env),
        process_cwd: cwd.to_path_buf(),
    };
    // Startup config errors are fatal; later reload errors are not.
    let cfg = source.load(runtime.file_system.as_ref())?;

    let options = RefreshOptions {
        max_ticks: if cli.once { Some(1) } else { cli.max_ticks },
    };
    let mut refresh = RefreshLoop::new(runtime, source, cfg);

    runtime.terminal.begin_session()?;
    let outcome = refresh.run(options);
    let restored = runtime.terminal.end_session();
    outcome?;
    restored?;
    Ok(0)
}

fn env_to_map(env: &[(std::ffi::OsString, std::ffi::OsString)]) -> EnvMap {
    let mut map = EnvMap::new();
    for (key, value) in env {
        if let (Some(key), Some(value)) = (key.to_str(), value.to_str()) {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}
