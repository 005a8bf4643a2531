use serde::Deserialize;
use std::path::PathBuf;

/// Knobs of the exploration engine itself.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ExplorerSettings {
    /// Synthesize a fake-return successor at calls so whole callees can
    /// be skipped. Without this, deep call trees must be walked in
    /// full, and unanalyzable callees dead-end their paths.
    #[serde(default = "default_use_fake_returns")]
    pub use_fake_returns: bool,
    /// Treat an address depending on several distinct symbolic sources
    /// as tainted. Off by default: mixed-source addresses are a known
    /// false-positive shape.
    #[serde(default)]
    pub allow_multi_source: bool,
    /// Treat a call that re-enters its own block as an import/veneer
    /// boundary: run the service-call check and stop the path there.
    /// This is a heuristic, hence the toggle.
    #[serde(default = "default_self_call_boundary")]
    pub self_call_boundary: bool,
    /// Stop after this many stepped units. The traversal is best-effort
    /// and need not terminate on its own; this is the operational cap.
    #[serde(default)]
    pub max_iterations: Option<u64>,
    /// Poisoned return address: service calls are redirected here, and
    /// units arriving here are dropped.
    #[serde(default = "default_sentinel_return")]
    pub sentinel_return: u64,
}

fn default_use_fake_returns() -> bool {
    true
}

fn default_self_call_boundary() -> bool {
    true
}

fn default_sentinel_return() -> u64 {
    0x4141_4141
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            use_fake_returns: default_use_fake_returns(),
            allow_multi_source: false,
            self_call_boundary: default_self_call_boundary(),
            max_iterations: None,
            sentinel_return: default_sentinel_return(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ReportSettings {
    /// Where to write the JSON findings report, if anywhere.
    #[serde(default)]
    pub json_path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct SinkwalkConfig {
    #[serde(default)]
    pub explorer: ExplorerSettings,
    #[serde(default)]
    pub report: ReportSettings,
}

impl SinkwalkConfig {
    pub fn load_from_file(path: &PathBuf) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;

        let config: SinkwalkConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })?;

        Ok(config)
    }
}
