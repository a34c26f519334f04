use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::services::llm::LlmConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    pub llm: LlmConfig,

    pub synthesis: SynthesisConfig,

    pub channel: ChannelConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SynthesisConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChannelConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkflowConfig {
    /// Upper bound on concurrent per-pattern model-image requests.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_model_reference_limit")]
    pub model_reference_limit: usize,
    #[serde(default = "default_prompt_title_limit")]
    pub prompt_title_limit: usize,
    #[serde(default = "default_final_reference_limit")]
    pub final_reference_limit: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            model_reference_limit: default_model_reference_limit(),
            prompt_title_limit: default_prompt_title_limit(),
            final_reference_limit: default_final_reference_limit(),
        }
    }
}

fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_max_concurrency() -> usize {
    4
}
fn default_model_reference_limit() -> usize {
    5
}
fn default_prompt_title_limit() -> usize {
    5
}
fn default_final_reference_limit() -> usize {
    8
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("{} not found. Please create one.", path.display());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(self.preview_folder())?;
        Ok(())
    }

    pub fn preview_folder(&self) -> PathBuf {
        Path::new(&self.build_folder).join("previews")
    }

    pub fn session_path(&self) -> PathBuf {
        Path::new(&self.build_folder).join("session.json")
    }

    pub fn records_path(&self) -> PathBuf {
        Path::new(&self.output_folder).join("thumbnails.jsonl")
    }
}
