use crate::errors::CampboardError;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub type EnvMap = BTreeMap<String, String>;

pub const ENV_SHEET_ID: &str = "GOOGLE_SHEET_ID";
pub const ENV_SHEET_NAME: &str = "SHEET_NAME";
pub const ENV_API_KEY: &str = "GOOGLE_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_ACCESS_TOKEN";
pub const ENV_SERVICE_ACCOUNT_KEY: &str = "GOOGLE_SERVICE_ACCOUNT_KEY";
pub const ENV_SERVICE_ACCOUNT_JSON: &str = "GOOGLE_SERVICE_ACCOUNT_JSON";

pub const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 8;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub title: Option<String>,
    pub sheet_id: Option<String>,
    pub sheet_name: Option<String>,
    pub interval_seconds: Option<u64>,
    pub request_timeout_seconds: Option<u64>,
    pub log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub dashboard: DashboardConfig,
    pub source: SourceConfig,
    pub credentials: CredentialsConfig,
    pub refresh: RefreshConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardConfig {
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    pub sheet_id: Option<String>,
    pub sheet_name: String,
    pub request_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialsConfig {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    /// Inline service-account key JSON.
    pub service_account_json: Option<String>,
    /// Path to a service-account key JSON file.
    pub service_account_key: Option<PathBuf>,
    pub token_command: Option<Vec<String>>,
    pub token_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshConfig {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_calls: usize,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    pub path: Option<PathBuf>,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dashboard: DashboardConfig {
                title: "Working Camp 2025".to_string(),
            },
            source: SourceConfig {
                sheet_id: None,
                sheet_name: "Counts".to_string(),
                request_timeout_seconds: DEFAULT_REQUEST_TIMEOUT_SECONDS,
                cache_ttl_seconds: 8,
            },
            credentials: CredentialsConfig {
                api_key: None,
                access_token: None,
                service_account_json: None,
                service_account_key: None,
                token_command: None,
                token_ttl_seconds: 50 * 60,
            },
            refresh: RefreshConfig {
                interval_seconds: 10,
            },
            rate_limit: RateLimitConfig {
                max_calls: 50,
                window_seconds: 60,
            },
            logging: LoggingConfig {
                path: None,
                max_payload_bytes: 4096,
                budget_bytes: 10 * 1024 * 1024,
            },
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialAppConfig {
    dashboard: Option<PartialDashboardConfig>,
    source: Option<PartialSourceConfig>,
    credentials: Option<PartialCredentialsConfig>,
    refresh: Option<PartialRefreshConfig>,
    rate_limit: Option<PartialRateLimitConfig>,
    logging: Option<PartialLoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDashboardConfig {
    title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialSourceConfig {
    sheet_id: Option<String>,
    sheet_name: Option<String>,
    request_timeout_seconds: Option<u64>,
    cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialCredentialsConfig {
    api_key: Option<String>,
    access_token: Option<String>,
    service_account_json: Option<String>,
    service_account_key: Option<PathBuf>,
    token_command: Option<Vec<String>>,
    token_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRefreshConfig {
    interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRateLimitConfig {
    max_calls: Option<usize>,
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialLoggingConfig {
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Everything needed to rebuild the config on every tick.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub overrides: CliOverrides,
    pub env: EnvMap,
    pub process_cwd: PathBuf,
}

impl ConfigSource {
    pub fn load(&self, fs: &dyn FileSystem) -> Result<AppConfig, CampboardError> {
        load_config(&self.overrides, &self.env, &self.process_cwd, fs)
    }
}

pub fn load_config(
    overrides: &CliOverrides,
    env: &EnvMap,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, CampboardError> {
    let mut cfg = AppConfig::default();
    let mut timeout_pinned = overrides.request_timeout_seconds.is_some();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| CampboardError::ConfigParse(e.to_string()))?;
        timeout_pinned |= partial
            .source
            .as_ref()
            .is_some_and(|source| source.request_timeout_seconds.is_some());
        merge_partial_config(&mut cfg, partial);
    }

    apply_env_overrides(&mut cfg, env);
    apply_cli_overrides(&mut cfg, overrides);

    if !timeout_pinned {
        cfg.source.request_timeout_seconds = default_request_timeout(cfg.refresh.interval_seconds);
    }

    if let Some(path) = &cfg.credentials.service_account_key {
        cfg.credentials.service_account_key = Some(absolutize_path(process_cwd, path));
    }
    let log_path = cfg
        .logging
        .path
        .clone()
        .unwrap_or_else(|| PathBuf::from(".cache/campboard/dashboard.jsonl"));
    cfg.logging.path = Some(absolutize_path(process_cwd, &log_path));

    validate_config(&cfg)?;
    Ok(cfg)
}

/// The request timeout used when none is configured: 8 s, kept below the
/// refresh interval.
pub fn default_request_timeout(interval_seconds: u64) -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECONDS
        .min(interval_seconds.saturating_sub(1))
        .max(1)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(dashboard) = partial.dashboard {
        if let Some(title) = dashboard.title {
            cfg.dashboard.title = title;
        }
    }

    if let Some(source) = partial.source {
        if let Some(value) = source.sheet_id {
            cfg.source.sheet_id = Some(value);
        }
        if let Some(value) = source.sheet_name {
            cfg.source.sheet_name = value;
        }
        if let Some(value) = source.request_timeout_seconds {
            cfg.source.request_timeout_seconds = value;
        }
        if let Some(value) = source.cache_ttl_seconds {
            cfg.source.cache_ttl_seconds = value;
        }
    }

    if let Some(credentials) = partial.credentials {
        if let Some(value) = credentials.api_key {
            cfg.credentials.api_key = Some(value);
        }
        if let Some(value) = credentials.access_token {
            cfg.credentials.access_token = Some(value);
        }
        if let Some(value) = credentials.service_account_json {
            cfg.credentials.service_account_json = Some(value);
        }
        if let Some(value) = credentials.service_account_key {
            cfg.credentials.service_account_key = Some(value);
        }
        if let Some(value) = credentials.token_command {
            cfg.credentials.token_command = Some(value);
        }
        if let Some(value) = credentials.token_ttl_seconds {
            cfg.credentials.token_ttl_seconds = value;
        }
    }

    if let Some(refresh) = partial.refresh {
        if let Some(value) = refresh.interval_seconds {
            cfg.refresh.interval_seconds = value;
        }
    }

    if let Some(rate_limit) = partial.rate_limit {
        if let Some(value) = rate_limit.max_calls {
            cfg.rate_limit.max_calls = value;
        }
        if let Some(value) = rate_limit.window_seconds {
            cfg.rate_limit.window_seconds = value;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.path {
            cfg.logging.path = Some(value);
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_env_overrides(cfg: &mut AppConfig, env: &EnvMap) {
    let lookup = |key: &str| {
        env.get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(value) = lookup(ENV_SHEET_ID) {
        cfg.source.sheet_id = Some(value);
    }
    if let Some(value) = lookup(ENV_SHEET_NAME) {
        cfg.source.sheet_name = value;
    }
    if let Some(value) = lookup(ENV_API_KEY) {
        cfg.credentials.api_key = Some(value);
    }
    if let Some(value) = lookup(ENV_ACCESS_TOKEN) {
        cfg.credentials.access_token = Some(value);
    }
    if let Some(value) = lookup(ENV_SERVICE_ACCOUNT_JSON) {
        cfg.credentials.service_account_json = Some(value);
    }
    if let Some(value) = lookup(ENV_SERVICE_ACCOUNT_KEY) {
        cfg.credentials.service_account_key = Some(PathBuf::from(value));
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(title) = &overrides.title {
        cfg.dashboard.title = title.clone();
    }
    if let Some(sheet_id) = &overrides.sheet_id {
        cfg.source.sheet_id = Some(sheet_id.clone());
    }
    if let Some(sheet_name) = &overrides.sheet_name {
        cfg.source.sheet_name = sheet_name.clone();
    }
    if let Some(interval) = overrides.interval_seconds {
        cfg.refresh.interval_seconds = interval;
    }
    if let Some(timeout) = overrides.request_timeout_seconds {
        cfg.source.request_timeout_seconds = timeout;
    }
    if let Some(path) = &overrides.log_path {
        cfg.logging.path = Some(path.clone());
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), CampboardError> {
    if cfg.refresh.interval_seconds == 0 {
        return Err(CampboardError::InvalidConfig(
            "refresh.interval_seconds must be greater than zero".to_string(),
        ));
    }

    if cfg.source.request_timeout_seconds == 0 {
        return Err(CampboardError::InvalidConfig(
            "source.request_timeout_seconds must be greater than zero".to_string(),
        ));
    }

    if cfg.source.request_timeout_seconds >= cfg.refresh.interval_seconds {
        return Err(CampboardError::InvalidConfig(format!(
            "source.request_timeout_seconds ({}) must be shorter than refresh.interval_seconds ({})",
            cfg.source.request_timeout_seconds, cfg.refresh.interval_seconds
        )));
    }

    if cfg.rate_limit.max_calls == 0 || cfg.rate_limit.window_seconds == 0 {
        return Err(CampboardError::InvalidConfig(
            "rate_limit.max_calls and rate_limit.window_seconds must be greater than zero"
                .to_string(),
        ));
    }

    if cfg.source.sheet_name.trim().is_empty() {
        return Err(CampboardError::InvalidConfig(
            "source.sheet_name must not be empty".to_string(),
        ));
    }

    if let Some(command) = &cfg.credentials.token_command {
        if command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(CampboardError::InvalidConfig(
                "credentials.token_command must name a program".to_string(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        default_request_timeout, load_config, CliOverrides, EnvMap, ENV_SERVICE_ACCOUNT_JSON,
        ENV_SHEET_ID, ENV_SHEET_NAME,
    };
    use crate::runtime::FakeFileSystem;
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults_match_dashboard_baseline() {
        let cfg = load_config(
            &CliOverrides::default(),
            &EnvMap::new(),
            Path::new("/srv"),
            &FakeFileSystem::default(),
        )
        .expect("config");
        assert_eq!(cfg.source.sheet_name, "Counts");
        assert_eq!(cfg.source.sheet_id, None);
        assert_eq!(cfg.refresh.interval_seconds, 10);
        assert_eq!(cfg.rate_limit.max_calls, 50);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
        assert_eq!(
            cfg.logging.path,
            Some(PathBuf::from("/srv/.cache/campboard/dashboard.jsonl"))
        );
    }

    #[test]
    fn file_then_env_then_cli_layers_apply_in_order() {
        let fs = FakeFileSystem::with_file(
            "/srv/campboard.toml",
            r#"
[dashboard]
title = "Spring Camp"
[source]
sheet_id = "from-file"
sheet_name = "Tally"
[rate_limit]
max_calls = 5
[credentials]
service_account_key = "keys/sa.json"
"#,
        );
        let mut env = EnvMap::new();
        env.insert(ENV_SHEET_ID.to_string(), "from-env".to_string());
        env.insert(ENV_SHEET_NAME.to_string(), "   ".to_string());
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("campboard.toml")),
            interval_seconds: Some(30),
            ..CliOverrides::default()
        };

        let cfg = load_config(&overrides, &env, Path::new("/srv"), &fs).expect("config");
        assert_eq!(cfg.dashboard.title, "Spring Camp");
        assert_eq!(cfg.source.sheet_id.as_deref(), Some("from-env"));
        assert_eq!(cfg.source.sheet_name, "Tally");
        assert_eq!(cfg.rate_limit.max_calls, 5);
        assert_eq!(cfg.rate_limit.window_seconds, 60);
        assert_eq!(cfg.refresh.interval_seconds, 30);
        assert_eq!(
            cfg.credentials.service_account_key,
            Some(PathBuf::from("/srv/keys/sa.json"))
        );
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        let fs = FakeFileSystem::with_file(
            "/cfg.toml",
            "[refresh]\ninterval_seconds = 5\n[source]\nrequest_timeout_seconds = 5\n",
        );
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, &EnvMap::new(), Path::new("/"), &fs)
            .expect_err("invalid timeout");
        assert!(err.to_string().contains("must be shorter than"));
    }

    #[test]
    fn short_interval_lowers_the_default_timeout() {
        let overrides = CliOverrides {
            interval_seconds: Some(5),
            ..CliOverrides::default()
        };
        let cfg = load_config(&overrides, &EnvMap::new(), Path::new("/"), &FakeFileSystem::default())
            .expect("interval 5 is valid without an explicit timeout");
        assert_eq!(cfg.source.request_timeout_seconds, 4);
        assert_eq!(default_request_timeout(30), 8);
        assert_eq!(default_request_timeout(2), 1);
    }

    #[test]
    fn explicit_timeout_is_kept_and_still_validated() {
        let overrides = CliOverrides {
            interval_seconds: Some(5),
            request_timeout_seconds: Some(2),
            ..CliOverrides::default()
        };
        let cfg = load_config(&overrides, &EnvMap::new(), Path::new("/"), &FakeFileSystem::default())
            .expect("config");
        assert_eq!(cfg.source.request_timeout_seconds, 2);

        let overrides = CliOverrides {
            interval_seconds: Some(5),
            request_timeout_seconds: Some(8),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, &EnvMap::new(), Path::new("/"), &FakeFileSystem::default())
            .expect_err("explicit timeout longer than interval");
        assert!(err.to_string().contains("must be shorter than"));
    }

    #[test]
    fn inline_service_account_json_comes_from_env() {
        let mut env = EnvMap::new();
        env.insert(
            ENV_SERVICE_ACCOUNT_JSON.to_string(),
            r#" {"type":"service_account"} "#.to_string(),
        );
        let cfg = load_config(&CliOverrides::default(), &env, Path::new("/"), &FakeFileSystem::default())
            .expect("config");
        assert_eq!(
            cfg.credentials.service_account_json.as_deref(),
            Some(r#"{"type":"service_account"}"#)
        );
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let fs = FakeFileSystem::with_file("/cfg.toml", "[rate_limit]\nmax_calls = 0\n");
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..CliOverrides::default()
        };
        assert!(load_config(&overrides, &EnvMap::new(), Path::new("/"), &fs).is_err());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let fs = FakeFileSystem::with_file("/cfg.toml", "[source\nsheet_id = 1");
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/cfg.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, &EnvMap::new(), Path::new("/"), &fs)
            .expect_err("parse error");
        assert!(err.to_string().starts_with("config parse error"));
    }
}
