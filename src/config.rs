use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::filter::PathFilter;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_true")]
    pub ignore_dot_dirs: bool,
    #[serde(default)]
    pub include_patterns: Vec<String>,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub include_regex: Vec<String>,
    #[serde(default)]
    pub exclude_regex: Vec<String>,
    #[serde(default)]
    pub case_insensitive: bool,
    /// Extraction worker count; 0 picks the available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub polling_rate_ms: u64,
    #[serde(default)]
    pub extract_timeout_secs: Option<u64>,
    /// Keep every produced record in the run report.
    #[serde(default)]
    pub keep_records: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            follow_symlinks: false,
            ignore_dot_dirs: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            include_regex: Vec::new(),
            exclude_regex: Vec::new(),
            case_insensitive: false,
            workers: 0,
            channel_capacity: default_channel_capacity(),
            polling_rate_ms: 0,
            extract_timeout_secs: None,
            keep_records: false,
        }
    }
}

impl CrawlerConfig {
    pub fn resolved_workers(&self) -> usize {
        match self.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            n => n,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
    #[serde(default = "default_max_preview_rows")]
    pub max_preview_rows: usize,
    #[serde(default = "default_max_structure_bytes")]
    pub max_structure_bytes: usize,
    #[serde(default = "default_max_hdf_objects")]
    pub max_hdf_objects: usize,
    #[serde(default = "default_max_hdf_depth")]
    pub max_hdf_depth: usize,
    #[serde(default = "default_true")]
    pub pdf_text_preview: bool,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_text_bytes: default_max_text_bytes(),
            preview_chars: default_preview_chars(),
            max_keywords: default_max_keywords(),
            max_preview_rows: default_max_preview_rows(),
            max_structure_bytes: default_max_structure_bytes(),
            max_hdf_objects: default_max_hdf_objects(),
            max_hdf_depth: default_max_hdf_depth(),
            pdf_text_preview: true,
            enable_fallback: true,
        }
    }
}

fn default_max_text_bytes() -> usize {
    10_000
}
fn default_preview_chars() -> usize {
    1_000
}
fn default_max_keywords() -> usize {
    10
}
fn default_max_preview_rows() -> usize {
    5
}
fn default_max_structure_bytes() -> usize {
    10_000_000
}
fn default_max_hdf_objects() -> usize {
    64
}
fn default_max_hdf_depth() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub index_id: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    #[serde(default = "default_visible_to")]
    pub visible_to: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sealed batches allowed to wait for the publisher before the
    /// crawl blocks.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            index_id: None,
            batch_size: default_batch_size(),
            subject_prefix: default_subject_prefix(),
            visible_to: default_visible_to(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            timeout_secs: default_timeout_secs(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_base_url() -> String {
    "https://search.api.globus.org".to_string()
}
fn default_batch_size() -> usize {
    100
}
fn default_subject_prefix() -> String {
    "file://".to_string()
}
fn default_visible_to() -> Vec<String> {
    vec!["public".to_string()]
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    32_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_queue_capacity() -> usize {
    4
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MetadataConfig {
    #[serde(default)]
    pub save_json: bool,
    #[serde(default)]
    pub json_dir: Option<PathBuf>,
}

impl Config {
    /// Check invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.publish.batch_size == 0 {
            anyhow::bail!("publish.batch_size must be >= 1");
        }
        if self.publish.max_attempts == 0 {
            anyhow::bail!("publish.max_attempts must be >= 1");
        }
        if self.publish.queue_capacity == 0 {
            anyhow::bail!("publish.queue_capacity must be >= 1");
        }
        if self.publish.subject_prefix.is_empty() {
            anyhow::bail!("publish.subject_prefix must not be empty");
        }
        if self.crawler.channel_capacity == 0 {
            anyhow::bail!("crawler.channel_capacity must be >= 1");
        }
        if self.crawler.extract_timeout_secs == Some(0) {
            anyhow::bail!("crawler.extract_timeout_secs must be > 0 when set");
        }
        if self.metadata.save_json && self.metadata.json_dir.is_none() {
            anyhow::bail!("metadata.json_dir is required when metadata.save_json = true");
        }

        // Surface bad globs/regexes at load time rather than mid-crawl.
        PathFilter::new(&self.crawler).with_context(|| "Invalid crawler patterns")?;

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.crawler.ignore_dot_dirs);
        assert!(!config.crawler.follow_symlinks);
        assert_eq!(config.publish.batch_size, 100);
        assert_eq!(config.publish.subject_prefix, "file://");
        assert_eq!(config.publish.visible_to, vec!["public".to_string()]);
        assert!(config.extract.enable_fallback);
        config.validate().unwrap();
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config: Config = toml::from_str("[publish]\nbatch_size = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn bad_regex_is_rejected() {
        let config: Config = toml::from_str("[crawler]\nexclude_regex = [\"(unclosed\"]\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_json_requires_dir() {
        let mut config = Config::default();
        config.metadata.save_json = true;
        assert!(config.validate().is_err());
        config.metadata.json_dir = Some(PathBuf::from("/tmp/meta"));
        config.validate().unwrap();
    }

    #[test]
    fn load_config_reads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spawn.toml");
        std::fs::write(
            &path,
            r#"
[crawler]
max_depth = 2
include_patterns = ["*.txt"]
workers = 3

[publish]
index_id = "abc"
batch_size = 10
"#,
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.crawler.max_depth, Some(2));
        assert_eq!(config.crawler.resolved_workers(), 3);
        assert_eq!(config.publish.index_id.as_deref(), Some("abc"));
    }
}
