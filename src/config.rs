use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_output")]
    pub output_folder: String,

    #[serde(default = "default_build")]
    pub build_folder: String,

    /// When false, the run pauses for confirmation between chapters.
    #[serde(default = "default_unattended")]
    pub unattended: bool,

    #[serde(default)]
    pub book: BookConfig,

    pub llm: LlmConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BookConfig {
    #[serde(default = "default_num_characters")]
    pub num_characters: usize,

    #[serde(default = "default_num_chapters")]
    pub num_chapters: usize,

    #[serde(default = "default_words_per_chapter")]
    pub words_per_chapter: usize,

    /// Editorial revision bound per chapter.
    #[serde(default = "default_max_edit_iterations")]
    pub max_edit_iterations: usize,

    /// Run the whole-narrative review pass after all chapters are written.
    #[serde(default)]
    pub review_pass: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini", "ollama" or "openai"
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

fn default_output() -> String {
    "output".to_string()
}
fn default_build() -> String {
    "build".to_string()
}
fn default_unattended() -> bool {
    true
}
fn default_num_characters() -> usize {
    5
}
fn default_num_chapters() -> usize {
    10
}
fn default_words_per_chapter() -> usize {
    2500
}
fn default_max_edit_iterations() -> usize {
    5
}
fn default_timeout_seconds() -> u64 {
    300
}

impl Default for BookConfig {
    fn default() -> Self {
        Self {
            num_characters: default_num_characters(),
            num_chapters: default_num_chapters(),
            words_per_chapter: default_words_per_chapter(),
            max_edit_iterations: default_max_edit_iterations(),
            review_pass: false,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Path::new("config.yml");
        if !path.exists() {
            anyhow::bail!("config.yml not found. Please create one.");
        }

        let content = fs::read_to_string(path).context("Failed to read config.yml")?;
        let config: Config =
            serde_yaml_ng::from_str(&content).context("Failed to parse config.yml")?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(self)?;
        fs::write("config.yml", content).context("Failed to write config.yml")?;
        Ok(())
    }

    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.output_folder)?;
        fs::create_dir_all(&self.build_folder)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let yaml = r#"
llm:
  provider: ollama
  ollama:
    base_url: http://localhost:11434
    model: llama3.1:8b
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.output_folder, "output");
        assert_eq!(config.build_folder, "build");
        assert!(config.unattended);
        assert_eq!(config.book.num_characters, 5);
        assert_eq!(config.book.num_chapters, 10);
        assert_eq!(config.book.max_edit_iterations, 5);
        assert!(!config.book.review_pass);
        assert_eq!(config.llm.timeout_seconds, 300);
    }

    #[test]
    fn book_section_overrides() {
        let yaml = r#"
book:
  num_characters: 3
  num_chapters: 7
  review_pass: true
llm:
  provider: openai
  openai:
    api_key: sk-test
    model: gpt-4o-mini
"#;
        let config: Config = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.book.num_characters, 3);
        assert_eq!(config.book.num_chapters, 7);
        assert!(config.book.review_pass);
        assert_eq!(config.book.words_per_chapter, 2500);
    }
}
