use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Global configuration loaded from `~/.config/vgen/config.toml`.
///
/// Every knob has a default tuned for a single-process deployment; the file
/// is created on first run so operators can discover what is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VgenConfig {
    /// Base URL of the remote video-generation service.
    pub remote_base_url: String,
    /// Platform tag used when selecting accounts and naming downloads.
    pub platform: String,
    /// Directory holding `db/`, `uploads/`, and `downloads/`.
    pub data_dir: PathBuf,

    /// Capacity of the generate queue.
    pub generate_queue_capacity: usize,
    /// Capacity of the poll queue.
    pub poll_queue_capacity: usize,
    /// Capacity of the download queue.
    pub download_queue_capacity: usize,

    /// Concurrent generate workers.
    pub generate_workers: usize,
    /// Concurrent poll workers.
    pub poll_workers: usize,
    /// Concurrent download workers.
    pub download_workers: usize,

    /// Cap for per-error-class retry counters (heavy load, account switching).
    pub max_retry_count: u32,
    /// Cap for the generic transient-error counter.
    pub generic_retry_limit: u32,
    /// Cap for the no-account-available counter.
    pub no_account_retry_limit: u32,

    /// Polls before a job is declared timed out.
    pub max_poll_count: u32,
    /// Per-call timeout for the remote completion wait, in seconds.
    pub poll_call_timeout_secs: u64,
    /// Lower bound of the jittered sleep between polls, in seconds.
    pub poll_sleep_min_secs: u64,
    /// Upper bound of the jittered sleep between polls, in seconds.
    pub poll_sleep_max_secs: u64,

    /// Minutes of silence before an active job counts as stale.
    pub stale_cutoff_minutes: i64,
    /// Downloads smaller than this many bytes are treated as truncated.
    pub min_download_bytes: u64,
}

impl Default for VgenConfig {
    fn default() -> Self {
        Self {
            remote_base_url: "https://sora.chatgpt.com".to_string(),
            platform: "sora".to_string(),
            data_dir: PathBuf::from("data"),
            generate_queue_capacity: 64,
            poll_queue_capacity: 256,
            download_queue_capacity: 32,
            generate_workers: 20,
            poll_workers: 20,
            download_workers: 5,
            max_retry_count: 5,
            generic_retry_limit: 3,
            no_account_retry_limit: 3,
            max_poll_count: 60,
            poll_call_timeout_secs: 30,
            poll_sleep_min_secs: 15,
            poll_sleep_max_secs: 30,
            stale_cutoff_minutes: 15,
            min_download_bytes: 10_000,
        }
    }
}

impl VgenConfig {
    /// Path of the SQLite database file under the data dir.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db").join("vgen.db")
    }

    /// Directory downloaded videos land in.
    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    /// Directory staged reference images land in.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vgen")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VgenConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = VgenConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: VgenConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = VgenConfig::default();
        assert_eq!(cfg.generate_queue_capacity, 64);
        assert_eq!(cfg.poll_queue_capacity, 256);
        assert_eq!(cfg.download_queue_capacity, 32);
        assert_eq!(cfg.generate_workers, 20);
        assert_eq!(cfg.download_workers, 5);
        assert_eq!(cfg.max_poll_count, 60);
        assert_eq!(cfg.min_download_bytes, 10_000);
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = VgenConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: VgenConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.platform, cfg.platform);
        assert_eq!(parsed.generate_workers, cfg.generate_workers);
        assert_eq!(parsed.max_retry_count, cfg.max_retry_count);
        assert_eq!(parsed.data_dir, cfg.data_dir);
    }

    #[test]
    fn config_toml_partial_file_fills_defaults() {
        let toml = r#"
            platform = "veo"
            download_workers = 2
        "#;
        let cfg: VgenConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.platform, "veo");
        assert_eq!(cfg.download_workers, 2);
        // Unspecified keys fall back to defaults.
        assert_eq!(cfg.generate_workers, 20);
        assert_eq!(cfg.max_poll_count, 60);
    }

    #[test]
    fn data_paths_derive_from_data_dir() {
        let mut cfg = VgenConfig::default();
        cfg.data_dir = PathBuf::from("/tmp/vgen-data");
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/vgen-data/db/vgen.db"));
        assert_eq!(cfg.downloads_dir(), PathBuf::from("/tmp/vgen-data/downloads"));
        assert_eq!(cfg.uploads_dir(), PathBuf::from("/tmp/vgen-data/uploads"));
    }
}
