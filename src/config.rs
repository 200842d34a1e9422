use std::collections::BTreeMap;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{GuidelineSource, Table};
use crate::error::PgxError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-pgx.json";
pub const DEFAULT_API_BASE_URL: &str = "https://api.pharmgkb.org/v1";
pub const DEFAULT_CLINICAL_ANNOTATIONS_URL: &str =
    "https://api.pharmgkb.org/v1/download/file/data/clinicalAnnotations.zip";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub review_dir: Option<String>,
    #[serde(default)]
    pub backup_dir: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub clinical_annotations_url: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Settings for one synchronization run, built once and passed to every
/// component.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub database: Utf8PathBuf,
    pub review_dir: Utf8PathBuf,
    pub backup_dir: Option<Utf8PathBuf>,
    pub api_base_url: String,
    pub clinical_annotations_url: String,
    pub sources: Vec<GuidelineSource>,
    pub headers: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl ResolvedConfig {
    pub fn review_path(&self, table: Table) -> Utf8PathBuf {
        self.review_dir.join(table.review_file_name())
    }

    /// Directory receiving pre-load snapshots; defaults to the database's own
    /// directory.
    pub fn backup_root(&self) -> Utf8PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => self
                .database
                .parent()
                .map(|parent| parent.to_path_buf())
                .unwrap_or_else(|| Utf8PathBuf::from(".")),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit paths must be readable; the default `kira-pgx.json` is
    /// optional and built-in defaults apply when it is absent.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PgxError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| PgxError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PgxError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PgxError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let sources = match config.sources {
            Some(values) => values
                .iter()
                .map(|value| value.parse::<GuidelineSource>())
                .collect::<Result<Vec<_>, PgxError>>()?,
            None => GuidelineSource::all(),
        };

        Ok(ResolvedConfig {
            schema_version,
            database: config
                .database
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("assets/pgx_kb.sqlite3")),
            review_dir: config
                .review_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| Utf8PathBuf::from("data/output_review")),
            backup_dir: config.backup_dir.map(Utf8PathBuf::from),
            api_base_url: config
                .api_base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            clinical_annotations_url: config
                .clinical_annotations_url
                .unwrap_or_else(|| DEFAULT_CLINICAL_ANNOTATIONS_URL.to_string()),
            sources,
            headers: config.headers,
            timeout_secs: config.timeout_secs.unwrap_or(60),
        })
    }
}
