//! Harness and launch configuration

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};

/// Environment variable that redirects the screenshot tree (set by CI).
pub const ARTIFACT_ROOT_ENV: &str = "BUILD_ARTIFACTSTAGINGDIRECTORY";

/// Environment variable naming the host executable for the CLI runner.
pub const EXECUTABLE_ENV: &str = "EDITOR_E2E_EXECUTABLE";

/// Fallback artifact root, relative to the working directory.
pub const DEFAULT_ARTIFACT_ROOT: &str = "temp";

/// A template source written into the isolated user settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSource {
    pub name: String,
    pub url: String,
}

/// Process-wide harness configuration, fixed before any scenario runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Root under which `images-<platform>/` is created
    pub artifact_root: PathBuf,

    /// Platform tag for the image tree
    pub platform: String,

    /// Delay before each screen grab so rendering can settle
    #[serde(with = "duration_ms")]
    pub settle_delay: Duration,

    /// Gap used by `poll` when the caller gives none
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Startup timeout handed to the automation driver
    #[serde(with = "duration_ms")]
    pub startup_timeout: Duration,

    /// Template sources for the isolated settings document
    pub template_urls: Vec<TemplateSource>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            artifact_root: PathBuf::from(DEFAULT_ARTIFACT_ROOT),
            platform: std::env::consts::OS.to_string(),
            settle_delay: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(60),
            template_urls: Vec::new(),
        }
    }
}

impl HarnessConfig {
    /// Defaults with the artifact root taken from the environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Load a YAML config file, then apply environment overrides.
    pub fn from_yaml_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: HarnessConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(root) = artifact_root_override(std::env::var(ARTIFACT_ROOT_ENV).ok()) {
            self.artifact_root = root;
        }
        self
    }

    pub fn validate(&self) -> HarnessResult<()> {
        if self.platform.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("platform must not be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(HarnessError::InvalidConfig("poll_interval must be positive".into()));
        }
        Ok(())
    }

    /// `<artifact_root>/images-<platform>`
    pub fn images_root(&self) -> PathBuf {
        self.artifact_root.join(format!("images-{}", self.platform))
    }
}

fn artifact_root_override(value: Option<String>) -> Option<PathBuf> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// What the host should open at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Workspace {
    /// Start with no folder open
    #[default]
    None,
    Path(PathBuf),
}

impl Workspace {
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Workspace::None => None,
            Workspace::Path(p) => Some(p),
        }
    }
}

/// Per-launch options for the isolated fixture
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub workspace: Workspace,

    /// Explicit host executable; the driver's own discovery is used when unset
    pub executable_path: Option<PathBuf>,

    /// Extension under development, loaded with `--extensionDevelopmentPath`
    pub extension_development_path: Option<PathBuf>,

    /// Directory with the host's companion executables, prepended to PATH
    pub companion_bin_dir: Option<PathBuf>,

    /// Extra host arguments placed before the workspace
    pub extra_args: Vec<String>,

    pub template_urls: Vec<TemplateSource>,

    pub startup_timeout: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            workspace: Workspace::None,
            executable_path: None,
            extension_development_path: None,
            companion_bin_dir: None,
            extra_args: Vec::new(),
            template_urls: Vec::new(),
            startup_timeout: Duration::from_secs(60),
        }
    }
}

impl LaunchOptions {
    /// Options seeded from the harness config.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            template_urls: config.template_urls.clone(),
            startup_timeout: config.startup_timeout,
            ..Default::default()
        }
    }
}

mod duration_ms {
    use std::time::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
