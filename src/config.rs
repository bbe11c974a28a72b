use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::dataset::DatasetSource;
use crate::results::PageLayout;
use crate::semantic::{embeddings, DEFAULT_MODEL};
use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_DATASET: &str = "dataset.json";
const DEFAULT_LISTEN: &str = "0.0.0.0:5173";
const DEFAULT_HISTORY_LIMIT: usize = 10;
const DEFAULT_TRANSLATE_TIMEOUT_SECS: u64 = 30;

/// Embedding model settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Draw a progress bar while encoding the dataset
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            show_progress: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory of static files served at `/`
    #[serde(default)]
    pub public_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            public_dir: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Results on the first page
    #[serde(default = "default_page_size")]
    pub top_results: usize,

    /// Results on every following page
    #[serde(default = "default_page_size")]
    pub per_page: usize,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        let layout = PageLayout::default();
        Self {
            top_results: layout.top_results,
            per_page: layout.per_page,
        }
    }
}

impl ResultsConfig {
    pub fn layout(&self) -> PageLayout {
        PageLayout {
            top_results: self.top_results,
            per_page: self.per_page,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranslateConfig {
    #[serde(default = "default_translate_servers")]
    pub servers: Vec<String>,

    #[serde(default = "default_translate_source")]
    pub source: String,

    #[serde(default = "default_translate_target")]
    pub target: String,

    #[serde(default = "default_translate_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Self {
            servers: default_translate_servers(),
            source: default_translate_source(),
            target: default_translate_target(),
            timeout_secs: DEFAULT_TRANSLATE_TIMEOUT_SECS,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_dataset() -> String {
    DEFAULT_DATASET.to_string()
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_page_size() -> usize {
    10
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_translate_servers() -> Vec<String> {
    vec![
        "http://localhost:5000".to_string(),
        "http://localhost:5001".to_string(),
        "http://localhost:5002".to_string(),
    ]
}

fn default_translate_source() -> String {
    "auto".to_string()
}

fn default_translate_target() -> String {
    "en".to_string()
}

fn default_translate_timeout_secs() -> u64 {
    DEFAULT_TRANSLATE_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Dataset location: a file path or an http(s) URL
    #[serde(default = "default_dataset")]
    pub dataset: String,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub translate: TranslateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: default_dataset(),
            semantic: SemanticConfig::default(),
            server: ServerConfig::default(),
            results: ResultsConfig::default(),
            history: HistoryConfig::default(),
            translate: TranslateConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        DatasetSource::parse(&self.dataset).context("dataset")?;

        embeddings::parse_model_name(&self.semantic.model).context("semantic.model")?;

        if self.results.top_results == 0 || self.results.per_page == 0 {
            bail!("results.top_results and results.per_page must be greater than 0");
        }

        if self.history.limit == 0 {
            bail!("history.limit must be greater than 0");
        }

        if self.translate.servers.is_empty() {
            bail!("translate.servers must list at least one server");
        }
        for server in &self.translate.servers {
            url::Url::parse(server).with_context(|| format!("invalid translate server '{server}'"))?;
        }

        if self.translate.timeout_secs == 0 {
            bail!("translate.timeout_secs must be greater than 0");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults on first run.
    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path.as_ref())
            .context("failed to open config directory")?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.validate()?;

        // resave in case config version needs an upgrade
        let upgraded = serde_yml::to_string(&config)?;
        if config_str != upgraded {
            store.write(CONFIG_FILE, upgraded.as_bytes())?;
        }

        Ok(config)
    }

    pub fn dataset_source(&self) -> anyhow::Result<DatasetSource> {
        Ok(DatasetSource::parse(&self.dataset)?)
    }
}
