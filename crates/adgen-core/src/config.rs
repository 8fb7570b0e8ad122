//! Configuration types for adgen-core.
//!
//! This module defines [`EngineConfig`] (CLI-level overrides), [`ProjectConfig`]
//! (from `.adgen/config.yaml`), and all sub-configuration types. When the
//! orchestrator is built, CLI flags in `EngineConfig` take precedence over
//! values read from `ProjectConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use typed_builder::TypedBuilder;

use crate::error::CoreError;

// ── Engine Configuration (CLI-level) ─────────────────────────

/// Engine configuration provided by the CLI layer.
///
/// Contains the working directory and optional overrides for the remote
/// endpoint and identity. These values are merged with [`ProjectConfig`]
/// from `.adgen/config.yaml`, with `EngineConfig` values taking precedence.
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use adgen_core::EngineConfig;
///
/// let config = EngineConfig::builder()
///     .workdir(PathBuf::from("/tmp/campaign"))
///     .base_url("http://localhost:8080")
///     .build();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
pub struct EngineConfig {
    /// Directory holding `.adgen/` (config, template overrides, logs).
    workdir: PathBuf,

    /// Override remote service base URL.
    #[builder(default, setter(strip_option(fallback = base_url_opt), into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,

    /// Override the agent application name.
    #[builder(default, setter(strip_option(fallback = app_name_opt), into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    app_name: Option<String>,

    /// Override the invoking user identifier.
    #[builder(default, setter(strip_option(fallback = user_id_opt), into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

impl EngineConfig {
    /// Returns the working directory.
    pub fn workdir(&self) -> &PathBuf {
        &self.workdir
    }

    /// Returns the base URL override, if set.
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Returns the app name override, if set.
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Returns the user id override, if set.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Returns the `.adgen` directory path.
    pub fn adgen_dir(&self) -> PathBuf {
        self.workdir.join(".adgen")
    }

    /// Returns the path to `config.yaml` inside the `.adgen` directory.
    pub fn config_path(&self) -> PathBuf {
        self.adgen_dir().join("config.yaml")
    }

    /// Resolve the remote settings, applying CLI overrides on top of the file.
    pub fn resolve_remote(&self, project: &RemoteConfig) -> RemoteConfig {
        RemoteConfig {
            base_url: self
                .base_url()
                .map_or_else(|| project.base_url.clone(), str::to_owned),
            app_name: self
                .app_name()
                .map_or_else(|| project.app_name.clone(), str::to_owned),
            user_id: self
                .user_id()
                .map_or_else(|| project.user_id.clone(), str::to_owned),
            timeout_secs: project.timeout_secs,
        }
    }
}

// ── Project Configuration (.adgen/config.yaml) ───────────────

/// Project-level configuration, deserialized from `.adgen/config.yaml`.
///
/// All fields have serde defaults so that missing keys in the YAML file
/// produce valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Remote agent service connection.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Public storage endpoint used to rewrite storage-object URIs.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Footage generation settings.
    #[serde(default)]
    pub footage: FootageConfig,

    /// Prompt template search paths.
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Placeholder assets used when a footage response carries no URL.
    #[serde(default)]
    pub fallback: FallbackConfig,
}

// ── Sub-configuration types ──────────────────────────────────

/// Remote multi-agent service settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    /// Base URL of the agent service (no trailing slash needed).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Agent application that owns the sessions.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Identifier of the invoking user.
    #[serde(default = "default_user_id")]
    pub user_id: String,

    /// Per-request timeout. Rendering calls can take many minutes.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl RemoteConfig {
    /// Returns the request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_name: default_app_name(),
            user_id: default_user_id(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Web prefix that replaces `gs://` in storage-object URIs.
    #[serde(default = "default_public_endpoint")]
    pub public_endpoint: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            public_endpoint: default_public_endpoint(),
        }
    }
}

/// Footage generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootageConfig {
    /// Issue the A-roll and B-roll requests concurrently.
    #[serde(default = "default_true")]
    pub concurrent: bool,
}

impl Default for FootageConfig {
    fn default() -> Self {
        Self { concurrent: true }
    }
}

/// Prompt template configuration.
///
/// Specifies additional directories to search for template overrides.
/// Templates found in these directories replace built-in templates with the
/// same name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsConfig {
    /// Additional template directories to search (in order).
    #[serde(default)]
    pub include: Vec<PathBuf>,
}

/// Placeholder video URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackConfig {
    #[serde(default = "default_aroll_url", deserialize_with = "non_blank_url")]
    pub aroll_url: String,

    #[serde(default = "default_broll_url", deserialize_with = "non_blank_url")]
    pub broll_url: String,

    #[serde(default = "default_final_video_url", deserialize_with = "non_blank_url")]
    pub final_video_url: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            aroll_url: default_aroll_url(),
            broll_url: default_broll_url(),
            final_video_url: default_final_video_url(),
        }
    }
}

// ── Default value functions for serde ────────────────────────

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8000".to_owned()
}

fn default_app_name() -> String {
    "manager".to_owned()
}

fn default_user_id() -> String {
    "user_123".to_owned()
}

fn default_timeout_secs() -> u64 {
    15 * 60
}

fn default_public_endpoint() -> String {
    "https://storage.googleapis.com".to_owned()
}

fn default_aroll_url() -> String {
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4".to_owned()
}

fn default_broll_url() -> String {
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ElephantsDream.mp4".to_owned()
}

fn default_final_video_url() -> String {
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ForBiggerBlazes.mp4"
        .to_owned()
}

fn non_blank_url<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let url = String::deserialize(deserializer)?;
    if url.trim().is_empty() {
        return Err(serde::de::Error::custom("fallback URL must not be blank"));
    }
    Ok(url)
}

// ── Config loading ───────────────────────────────────────────

/// Load [`ProjectConfig`] from the `.adgen/config.yaml` file.
///
/// If the file does not exist, returns the default configuration.
///
/// # Errors
///
/// Returns `CoreError::Io` if the file exists but cannot be read.
/// Returns `CoreError::Config` if the file contains invalid YAML or a blank
/// fallback URL.
pub fn load_project_config(config_path: &Path) -> Result<ProjectConfig, CoreError> {
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(config_path)?;
    if content.trim().is_empty() {
        return Ok(ProjectConfig::default());
    }
    let config: ProjectConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

const DEFAULT_CONFIG: &str = r#"# adgen configuration
# All keys are optional; the values below are the defaults.

remote:
  baseUrl: http://localhost:8000
  appName: manager
  userId: user_123
  # Rendering calls can take several minutes.
  timeoutSecs: 900

storage:
  publicEndpoint: https://storage.googleapis.com

footage:
  concurrent: true

prompts:
  # Directories with *.j2 files overriding the built-in instructions.
  include: []

# fallback:
#   arollUrl: https://example.com/aroll.mp4
#   brollUrl: https://example.com/broll.mp4
#   finalVideoUrl: https://example.com/final.mp4
"#;

/// Create `.adgen/` and write a commented default `config.yaml` into it.
///
/// # Errors
///
/// Returns `CoreError::Io` with `AlreadyExists` if `.adgen/` is present.
/// Returns `CoreError::Io` if the directory or file cannot be written.
pub fn write_default_config(config: &EngineConfig) -> Result<PathBuf, CoreError> {
    let dir = config.adgen_dir();
    if dir.exists() {
        return Err(CoreError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", dir.display()),
        )));
    }
    std::fs::create_dir_all(&dir)?;
    let path = config.config_path();
    std::fs::write(&path, DEFAULT_CONFIG)?;
    Ok(path)
}
