//! warpcron.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default delay between watch rounds.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);
/// Default interval between manifest directory scans.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_ENVIRONMENT: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine: Option<EngineSection>,
    pub watch: Option<WatchConfig>,
    pub dispatch: Option<DispatchConfig>,
    pub manifests: Option<ManifestsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSection {
    pub environment_id: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchConfig {
    pub retry_delay: Option<String>,
    pub resync_after_error: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    pub resolve_workflow: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestsConfig {
    pub dir: Option<PathBuf>,
    pub rescan_interval: Option<String>,
}

/// Resolved watch-loop behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    /// Sleep between subscription rounds.
    pub retry_delay: Duration,
    /// Request a full resync after a round that ended with a transport error.
    pub resync_after_error: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
            resync_after_error: false,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a warpcron.toml with every section filled in.
    pub fn scaffold(environment_id: &str) -> Self {
        EngineConfig {
            engine: Some(EngineSection {
                environment_id: Some(environment_id.to_string()),
                organization_id: None,
            }),
            watch: Some(WatchConfig {
                retry_delay: Some("200ms".to_string()),
                resync_after_error: Some(false),
            }),
            dispatch: Some(DispatchConfig {
                resolve_workflow: Some(true),
            }),
            manifests: Some(ManifestsConfig {
                dir: Some(PathBuf::from("./manifests")),
                rescan_interval: Some("10s".to_string()),
            }),
        }
    }

    pub fn environment_id(&self) -> String {
        self.engine
            .as_ref()
            .and_then(|e| e.environment_id.clone())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    pub fn organization_id(&self) -> String {
        self.engine
            .as_ref()
            .and_then(|e| e.organization_id.clone())
            .unwrap_or_default()
    }

    pub fn watch_settings(&self) -> anyhow::Result<WatchSettings> {
        let mut settings = WatchSettings::default();
        if let Some(watch) = &self.watch {
            if let Some(delay) = &watch.retry_delay {
                settings.retry_delay = parse_duration(delay)?;
            }
            if let Some(resync) = watch.resync_after_error {
                settings.resync_after_error = resync;
            }
        }
        Ok(settings)
    }

    pub fn resolve_workflow(&self) -> bool {
        self.dispatch
            .as_ref()
            .and_then(|d| d.resolve_workflow)
            .unwrap_or(true)
    }

    pub fn manifests_dir(&self) -> Option<PathBuf> {
        self.manifests.as_ref().and_then(|m| m.dir.clone())
    }

    pub fn rescan_interval(&self) -> anyhow::Result<Duration> {
        match self.manifests.as_ref().and_then(|m| m.rescan_interval.as_deref()) {
            Some(raw) => parse_duration(raw),
            None => Ok(DEFAULT_RESCAN_INTERVAL),
        }
    }
}

/// Parse `"200ms"`, `"10s"` or `"5m"`.
pub fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => anyhow::bail!("duration {raw:?} is missing a unit (ms, s, m)"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid duration {raw:?}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| anyhow::anyhow!("duration {raw:?} is too large")),
        other => anyhow::bail!("unknown duration unit {other:?} in {raw:?}"),
    }
}
