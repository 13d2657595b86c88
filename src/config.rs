use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::QuestionType;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub admission: AdmissionConfig,
    pub worker: WorkerConfig,
    pub daily: DailyConfig,
    pub scoring: ScoringConfig,
    pub hints: HintConfig,
    pub ai: AiConfig,
    pub storage: StorageConfig,
    /// Language -> ordered CEFR levels supported for generation.
    pub language_levels: BTreeMap<String, Vec<String>>,
    /// CEFR level -> target length of generated content.
    pub generation_lengths: BTreeMap<String, LengthRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_ai_concurrent: usize,
    pub max_ai_per_user: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_ai_concurrent: 10,
            max_ai_per_user: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub interval_secs: u64,
    /// Combos with fewer low-usage active questions than this are refilled.
    pub min_buffer: usize,
    /// Questions used at most this many times still count as inventory.
    pub low_usage_threshold: i64,
    pub generation_timeout_secs: u64,
    pub max_history: usize,
    pub max_failure_backoff_secs: u64,
    pub start_paused: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 180,
            min_buffer: 10,
            low_usage_threshold: 1,
            generation_timeout_secs: 60,
            max_history: 50,
            max_failure_backoff_secs: 3600,
            start_paused: false,
        }
    }
}

impl WorkerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    /// How many days past the user's local today an assignment may be requested.
    pub horizon_days: i64,
    pub default_goal: u32,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            horizon_days: 1,
            default_goal: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Topic accuracy (percent) below which the weak-area boost applies.
    pub weak_area_accuracy_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weak_area_accuracy_threshold: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    pub ttl_secs: u64,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self { ttl_secs: 600 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "ADAPTIQ_AI_API_KEY".to_string(),
            max_tokens: 2048,
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("adaptiq")
                .join("adaptiq.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthRange {
    pub min_words: u32,
    pub max_words: u32,
}

const CEFR_LEVELS: [&str; 6] = ["A1", "A2", "B1", "B2", "C1", "C2"];

fn default_language_levels() -> BTreeMap<String, Vec<String>> {
    ["italian", "spanish", "french", "german"]
        .iter()
        .map(|lang| (lang.to_string(), CEFR_LEVELS.iter().map(|l| l.to_string()).collect()))
        .collect()
}

fn default_generation_lengths() -> BTreeMap<String, LengthRange> {
    let table = [
        ("A1", 15, 40),
        ("A2", 30, 60),
        ("B1", 50, 90),
        ("B2", 80, 130),
        ("C1", 110, 170),
        ("C2", 140, 220),
    ];
    table
        .iter()
        .map(|(level, min_words, max_words)| {
            (
                level.to_string(),
                LengthRange {
                    min_words: *min_words,
                    max_words: *max_words,
                },
            )
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            admission: AdmissionConfig::default(),
            worker: WorkerConfig::default(),
            daily: DailyConfig::default(),
            scoring: ScoringConfig::default(),
            hints: HintConfig::default(),
            ai: AiConfig::default(),
            storage: StorageConfig::default(),
            language_levels: default_language_levels(),
            generation_lengths: default_generation_lengths(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain, then apply environment overrides
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut config = Self::load_file_chain(config_path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn load_file_chain(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Apply startup overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_AI_CONCURRENT") {
            self.admission.max_ai_concurrent = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_AI_CONCURRENT is not a number: {}", v))?;
        }
        if let Some(v) = lookup("MAX_AI_PER_USER") {
            self.admission.max_ai_per_user = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_AI_PER_USER is not a number: {}", v))?;
        }
        if let Some(v) = lookup("ADAPTIQ_DB_PATH") {
            self.storage.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("ADAPTIQ_AI_BASE_URL") {
            self.ai.base_url = v;
        }
        if let Some(v) = lookup("ADAPTIQ_AI_MODEL") {
            self.ai.model = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission.max_ai_concurrent == 0 {
            eyre::bail!("admission.max_ai_concurrent must be greater than zero");
        }
        if self.admission.max_ai_per_user == 0 {
            eyre::bail!("admission.max_ai_per_user must be greater than zero");
        }
        if self.worker.interval_secs == 0 {
            eyre::bail!("worker.interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// Whether generation is configured for this language/level pair.
    pub fn supports(&self, language: &str, level: &str) -> bool {
        self.language_levels
            .get(language)
            .map(|levels| levels.iter().any(|l| l == level))
            .unwrap_or(false)
    }

    /// Difficulty of a level as its position in the language's level list (0.0 - 1.0).
    pub fn difficulty_score(&self, language: &str, level: &str) -> f64 {
        let Some(levels) = self.language_levels.get(language) else {
            return 0.5;
        };
        match levels.iter().position(|l| l == level) {
            Some(_) if levels.len() == 1 => 0.0,
            Some(i) => i as f64 / (levels.len() - 1) as f64,
            None => 0.5,
        }
    }

    pub fn length_for(&self, level: &str) -> Option<LengthRange> {
        self.generation_lengths.get(level).copied()
    }

    /// Every question type the worker keeps stocked.
    pub fn question_types(&self) -> &'static [QuestionType] {
        QuestionType::ALL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_limits() {
        let config = Config::default();
        assert_eq!(config.admission.max_ai_concurrent, 10);
        assert_eq!(config.admission.max_ai_per_user, 2);
        assert_eq!(config.worker.min_buffer, 10);
        assert_eq!(config.daily.default_goal, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
admission:
  max_ai_concurrent: 4
worker:
  interval_secs: 30
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.admission.max_ai_concurrent, 4);
        assert_eq!(config.admission.max_ai_per_user, 2);
        assert_eq!(config.worker.interval_secs, 30);
        assert_eq!(config.worker.min_buffer, 10);
        assert!(config.supports("italian", "B1"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("MAX_AI_CONCURRENT", "20"), ("MAX_AI_PER_USER", " 5 ")].into();
        let mut config = Config::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.admission.max_ai_concurrent, 20);
        assert_eq!(config.admission.max_ai_per_user, 5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = Config::default();
        let result = config.apply_overrides(|k| (k == "MAX_AI_PER_USER").then(|| "two".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.admission.max_ai_per_user = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_supports_unknown_language() {
        let config = Config::default();
        assert!(!config.supports("klingon", "A1"));
        assert!(!config.supports("italian", "Z9"));
    }

    #[test]
    fn test_difficulty_score_by_position() {
        let config = Config::default();
        assert_eq!(config.difficulty_score("italian", "A1"), 0.0);
        assert_eq!(config.difficulty_score("italian", "C2"), 1.0);
        assert!((config.difficulty_score("italian", "B1") - 0.4).abs() < 1e-9);
        assert_eq!(config.difficulty_score("klingon", "A1"), 0.5);
    }

    #[test]
    fn test_generation_lengths_table() {
        let config = Config::default();
        let a1 = config.length_for("A1").unwrap();
        let c2 = config.length_for("C2").unwrap();
        assert!(a1.max_words < c2.max_words);
        assert!(config.length_for("Z9").is_none());
    }
}
