//! Configuration types.
//!
//! Two independent pieces:
//!
//! * [`ServiceConfig`]: paths, timeouts and limits for the engine itself,
//!   built via [`ServiceConfigBuilder`] or overlaid from the environment with
//!   [`ServiceConfig::from_env`].
//! * [`ModelsConfig`]: the external model registry, loaded from YAML with
//!   `${VAR}` substitution. Models are grouped by [`ModelCategory`]; within a
//!   category the first enabled entry wins.

use crate::error::DocmillError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Engine configuration.
///
/// # Example
/// ```rust
/// use docmill::ServiceConfig;
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .data_dir("/var/lib/docmill")
///     .session_ttl(Duration::from_secs(3600))
///     .build()
///     .unwrap();
/// assert_eq!(config.session_ttl.as_secs(), 3600);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root under which every session directory lives. Default: `./data`.
    pub data_dir: PathBuf,

    /// Age (by directory mtime) after which a session is reclaimed. Default: 24 h.
    pub session_ttl: Duration,

    /// Pause between sweeps. Default: 1 h.
    pub cleanup_interval: Duration,

    /// Global byte budget for all sessions together. Default: 100 GiB.
    pub disk_quota: u64,

    /// LibreOffice executable. Default: `/usr/bin/libreoffice`.
    pub libreoffice_path: PathBuf,

    /// Kill timeout for one office → PDF render. Default: 60 s.
    pub libreoffice_timeout: Duration,

    /// MarkItDown executable, resolved through `PATH` if relative. Default: `markitdown`.
    pub markitdown_path: PathBuf,

    /// Kill timeout for one MarkItDown run. Default: 120 s.
    pub markitdown_timeout: Duration,

    /// Files larger than this are rejected before any OCR call. Default: 32 MiB.
    ///
    /// The whole file is base64-inlined into a single chat message, so the
    /// cap bounds both memory use and request size.
    pub ocr_max_input_bytes: u64,

    /// Directory that mock `responsePath` entries are resolved against.
    /// Default: `config/mocks`.
    pub mock_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            disk_quota: 100 * GIB,
            libreoffice_path: PathBuf::from("/usr/bin/libreoffice"),
            libreoffice_timeout: Duration::from_secs(60),
            markitdown_path: PathBuf::from("markitdown"),
            markitdown_timeout: Duration::from_secs(120),
            ocr_max_input_bytes: 32 * MIB,
            mock_dir: PathBuf::from("config/mocks"),
        }
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overlaid with `DATA_DIR`, `LIBREOFFICE_PATH`,
    /// `MARKITDOWN_BIN` and `MARKITDOWN_TIMEOUT` (milliseconds).
    pub fn from_env() -> Result<Self, DocmillError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DocmillError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = non_empty("DATA_DIR") {
            builder = builder.data_dir(dir);
        }
        if let Some(path) = non_empty("LIBREOFFICE_PATH") {
            builder = builder.libreoffice_path(path);
        }
        if let Some(path) = non_empty("MARKITDOWN_BIN") {
            builder = builder.markitdown_path(path);
        }
        if let Some(raw) = non_empty("MARKITDOWN_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => builder = builder.markitdown_timeout(Duration::from_millis(ms)),
                Err(_) => warn!(value = %raw, "ignoring non-numeric MARKITDOWN_TIMEOUT"),
            }
        }
        builder.build()
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    pub fn session_ttl(mut self, ttl: Duration) -> Self {
        self.config.session_ttl = ttl;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.config.cleanup_interval = interval.max(Duration::from_secs(1));
        self
    }

    pub fn disk_quota(mut self, bytes: u64) -> Self {
        self.config.disk_quota = bytes;
        self
    }

    pub fn libreoffice_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.libreoffice_path = path.into();
        self
    }

    pub fn libreoffice_timeout(mut self, timeout: Duration) -> Self {
        self.config.libreoffice_timeout = timeout.max(Duration::from_secs(1));
        self
    }

    pub fn markitdown_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.markitdown_path = path.into();
        self
    }

    pub fn markitdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.markitdown_timeout = timeout.max(Duration::from_millis(100));
        self
    }

    pub fn ocr_max_input_bytes(mut self, bytes: u64) -> Self {
        self.config.ocr_max_input_bytes = bytes.max(1);
        self
    }

    pub fn mock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.mock_dir = dir.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, DocmillError> {
        let c = &self.config;
        if c.data_dir.as_os_str().is_empty() {
            return Err(DocmillError::InvalidConfig("data_dir must not be empty".into()));
        }
        if c.session_ttl.is_zero() {
            return Err(DocmillError::InvalidConfig("session_ttl must be > 0".into()));
        }
        if c.disk_quota == 0 {
            return Err(DocmillError::InvalidConfig("disk_quota must be > 0".into()));
        }
        if c.libreoffice_path.as_os_str().is_empty() || c.markitdown_path.as_os_str().is_empty() {
            return Err(DocmillError::InvalidConfig(
                "converter paths must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Models ───────────────────────────────────────────────────────────────

/// Functional grouping of models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Ocr,
    Translate,
    Qa,
    Review,
    Extract,
}

impl ModelCategory {
    pub const ALL: [ModelCategory; 5] = [
        ModelCategory::Ocr,
        ModelCategory::Translate,
        ModelCategory::Qa,
        ModelCategory::Review,
        ModelCategory::Extract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelCategory::Ocr => "ocr",
            ModelCategory::Translate => "translate",
            ModelCategory::Qa => "qa",
            ModelCategory::Review => "review",
            ModelCategory::Extract => "extract",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Azure,
    Custom,
}

impl ModelProvider {
    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ModelProvider::OpenAi => "OPENAI_API_KEY",
            ModelProvider::Azure => "AZURE_API_KEY",
            ModelProvider::Custom => "CUSTOM_API_KEY",
        }
    }

    /// The provider's API key, if set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(self.api_key_env())
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelProvider::OpenAi => "openai",
            ModelProvider::Azure => "azure",
            ModelProvider::Custom => "custom",
        })
    }
}

/// Canned reply source for a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockResponse {
    /// Wrapped into a one-choice chat completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// A complete response object, returned as is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockConfig {
    pub enabled: bool,
    /// Artificial latency in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MockResponse>,
    /// JSON response file, relative to [`ServiceConfig::mock_dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_path: Option<String>,
}

/// One external model endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub provider: ModelProvider,
    /// Model name sent in the request body.
    pub model: String,
    /// OpenAI-compatible chat-completions URL.
    pub endpoint: String,
    /// Hard per-call timeout in milliseconds.
    pub timeout: u64,
    pub max_concurrency: usize,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock: Option<MockConfig>,
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn is_mocked(&self) -> bool {
        self.mock.as_ref().is_some_and(|m| m.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Milliseconds.
    pub default_timeout: u64,
    pub default_max_concurrency: usize,
    pub retry_attempts: u32,
    /// Milliseconds.
    pub retry_delay: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default_timeout: 30_000,
            default_max_concurrency: 5,
            retry_attempts: 3,
            retry_delay: 1_000,
        }
    }
}

/// The model registry, one ordered list per category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub ocr: Vec<ModelConfig>,
    #[serde(default)]
    pub translate: Vec<ModelConfig>,
    #[serde(default)]
    pub qa: Vec<ModelConfig>,
    #[serde(default)]
    pub review: Vec<ModelConfig>,
    #[serde(default)]
    pub extract: Vec<ModelConfig>,
    #[serde(default)]
    pub settings: ModelSettings,
}

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\w+)\}").unwrap());

impl ModelsConfig {
    pub fn models(&self, category: ModelCategory) -> &[ModelConfig] {
        match category {
            ModelCategory::Ocr => &self.ocr,
            ModelCategory::Translate => &self.translate,
            ModelCategory::Qa => &self.qa,
            ModelCategory::Review => &self.review,
            ModelCategory::Extract => &self.extract,
        }
    }

    pub fn models_mut(&mut self, category: ModelCategory) -> &mut Vec<ModelConfig> {
        match category {
            ModelCategory::Ocr => &mut self.ocr,
            ModelCategory::Translate => &mut self.translate,
            ModelCategory::Qa => &mut self.qa,
            ModelCategory::Review => &mut self.review,
            ModelCategory::Extract => &mut self.extract,
        }
    }

    /// First enabled model in configuration order.
    pub fn first_enabled(&self, category: ModelCategory) -> Option<&ModelConfig> {
        self.models(category).iter().find(|m| m.enabled)
    }

    /// Look a model up by id across all categories.
    pub fn find(&self, model_id: &str) -> Option<&ModelConfig> {
        ModelCategory::ALL
            .iter()
            .flat_map(|c| self.models(*c))
            .find(|m| m.id == model_id)
    }

    /// Read, substitute and validate a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DocmillError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocmillError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml_str(&content)?;
        info!(
            event = "model.config.load",
            path = %path.display(),
            models = ModelCategory::ALL.iter().map(|c| config.models(*c).len()).sum::<usize>(),
            "model configuration loaded"
        );
        Ok(config)
    }

    /// [`load`](Self::load), falling back to an empty registry on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(event = "model.config.fallback", path = %path.display(), error = %e, "using empty model configuration");
                Self::default()
            }
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, DocmillError> {
        let resolved = substitute_env(content, |name| std::env::var(name).ok());
        let config: ModelsConfig = serde_yaml::from_str(&resolved)
            .map_err(|e| DocmillError::InvalidConfig(format!("models YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DocmillError> {
        let mut seen = HashSet::new();
        for category in ModelCategory::ALL {
            for model in self.models(category) {
                validate_model(model, category)?;
                if !seen.insert(model.id.as_str()) {
                    return Err(DocmillError::InvalidConfig(format!(
                        "duplicate model id '{}'",
                        model.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Replace every `${NAME}` with `lookup(NAME)`, or the empty string.
pub fn substitute_env<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PLACEHOLDER
        .replace_all(content, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

fn validate_model(model: &ModelConfig, category: ModelCategory) -> Result<(), DocmillError> {
    let invalid = |what: &str| {
        Err(DocmillError::InvalidConfig(format!(
            "{what} for model '{}' in category {category}",
            model.id
        )))
    };

    for (field, value) in [
        ("id", &model.id),
        ("name", &model.name),
        ("model", &model.model),
    ] {
        if value.trim().is_empty() {
            return invalid(&format!("missing required field '{field}'"));
        }
    }
    if model.endpoint.trim().is_empty() && !model.is_mocked() {
        return invalid("missing required field 'endpoint'");
    }
    if model.timeout == 0 {
        return invalid("invalid timeout");
    }
    if model.max_concurrency == 0 {
        return invalid("invalid max_concurrency");
    }

    if let Some(mock) = &model.mock {
        if let Some(response) = &mock.response {
            if let Some(payload) = &response.payload {
                if !payload.is_object() {
                    return invalid("invalid mock.response.payload");
                }
            }
        }
        if let Some(path) = &mock.response_path {
            if path.trim().is_empty() {
                return invalid("invalid mock.responsePath");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r##"
ocr:
  - id: ocr-main
    name: Main OCR
    provider: openai
    model: gpt-4o-mini
    endpoint: https://api.example.com/v1/chat/completions
    timeout: 30000
    max_concurrency: 2
    enabled: false
  - id: ocr-mock
    name: Mock OCR
    provider: custom
    model: mock-vision
    endpoint: ""
    timeout: 5000
    max_concurrency: 1
    enabled: true
    mock:
      enabled: true
      delay: 10
      response:
        message: "# Hello"
translate: []
settings:
  default_timeout: 30000
  default_max_concurrency: 5
  retry_attempts: 3
  retry_delay: 1000
"##;

    #[test]
    fn shipped_models_yaml_loads() {
        let config = ModelsConfig::from_yaml_str(include_str!("../config/models.yaml")).unwrap();
        assert_eq!(config.first_enabled(ModelCategory::Ocr).unwrap().id, "ocr-openai");
        assert!(config.find("ocr-mock").unwrap().is_mocked());
    }

    #[test]
    fn default_config_is_valid() {
        let c = ServiceConfig::builder().build().unwrap();
        assert_eq!(c.session_ttl, Duration::from_secs(86_400));
        assert_eq!(c.cleanup_interval, Duration::from_secs(3_600));
        assert_eq!(c.disk_quota, 100 * GIB);
        assert_eq!(c.ocr_max_input_bytes, 32 * MIB);
    }

    #[test]
    fn builder_rejects_zero_ttl() {
        assert!(ServiceConfig::builder()
            .session_ttl(Duration::ZERO)
            .build()
            .is_err());
    }

    #[test]
    fn builder_clamps_interval() {
        let c = ServiceConfig::builder()
            .cleanup_interval(Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(c.cleanup_interval, Duration::from_secs(1));
    }

    #[test]
    fn env_overlay() {
        let vars: HashMap<&str, &str> = [
            ("DATA_DIR", "/srv/data"),
            ("MARKITDOWN_BIN", "/opt/md"),
            ("MARKITDOWN_TIMEOUT", "5000"),
            ("LIBREOFFICE_PATH", ""),
        ]
        .into_iter()
        .collect();
        let c = ServiceConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(c.markitdown_path, PathBuf::from("/opt/md"));
        assert_eq!(c.markitdown_timeout, Duration::from_millis(5000));
        assert_eq!(c.libreoffice_path, PathBuf::from("/usr/bin/libreoffice"));
    }

    #[test]
    fn parses_models_yaml() {
        let config = ModelsConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(config.ocr.len(), 2);
        let chosen = config.first_enabled(ModelCategory::Ocr).unwrap();
        assert_eq!(chosen.id, "ocr-mock");
        assert!(chosen.is_mocked());
        assert_eq!(
            chosen
                .mock
                .as_ref()
                .and_then(|m| m.response.as_ref())
                .and_then(|r| r.message.as_deref()),
            Some("# Hello")
        );
        assert!(config.first_enabled(ModelCategory::Qa).is_none());
        assert_eq!(config.find("ocr-main").unwrap().provider, ModelProvider::OpenAi);
    }

    #[test]
    fn substitutes_placeholders() {
        let out = substitute_env("url: ${HOST}/v1 key: ${MISSING}", |k| {
            (k == "HOST").then(|| "http://h".to_string())
        });
        assert_eq!(out, "url: http://h/v1 key: ");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let bad = YAML.replace("max_concurrency: 2", "max_concurrency: 0");
        let err = ModelsConfig::from_yaml_str(&bad).unwrap_err();
        assert!(err.to_string().contains("max_concurrency"), "{err}");
    }

    #[test]
    fn rejects_missing_endpoint_for_live_model() {
        let bad = YAML.replace("endpoint: https://api.example.com/v1/chat/completions", "endpoint: \"\"");
        assert!(ModelsConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let bad = YAML.replace("id: ocr-mock", "id: ocr-main");
        assert!(ModelsConfig::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn missing_file_falls_back() {
        let config = ModelsConfig::load_or_default("/definitely/not/here.yaml");
        assert!(config.ocr.is_empty());
        assert_eq!(config.settings, ModelSettings::default());
    }
}
