//! Isolated host launch - fresh profile, settings, and environment per run

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{LaunchOptions, TemplateSource};
use crate::driver::{AutomationDriver, HostProcess, LaunchRequest, Surface};
use crate::error::{HarnessError, HarnessResult};

/// Settings key holding the template source list.
pub const TEMPLATE_URLS_SETTING: &str = "typespec.initTemplatesUrls";

const ROOT_PREFIX: &str = "editor-e2e-";

/// A throwaway profile: extension storage, user data, and process environment
///
/// The root is not removed when the run ends so it can be inspected afterwards.
#[derive(Debug, Clone)]
pub struct IsolatedEnvironment {
    pub root: PathBuf,
    pub extensions_dir: PathBuf,
    pub user_data_dir: PathBuf,
    pub settings_path: PathBuf,
    pub env: HashMap<String, String>,
}

impl IsolatedEnvironment {
    /// Create a new environment under the OS temp directory.
    pub fn create(options: &LaunchOptions) -> HarnessResult<Self> {
        Self::create_in(&std::env::temp_dir(), options)
    }

    /// Create a new environment under `base`.
    pub fn create_in(base: &Path, options: &LaunchOptions) -> HarnessResult<Self> {
        let root = base.join(format!("{}{}", ROOT_PREFIX, Uuid::new_v4()));
        let extensions_dir = root.join("extensions");
        let user_data_dir = root.join("user-data");
        let settings_dir = user_data_dir.join("User");

        std::fs::create_dir_all(&extensions_dir)?;
        std::fs::create_dir_all(&settings_dir)?;

        let settings_path = settings_dir.join("settings.json");
        let settings = settings_document(&options.template_urls);
        std::fs::write(&settings_path, serde_json::to_string_pretty(&settings)?)?;

        let env = build_env(inherited_env()?, options.companion_bin_dir.as_deref())?;

        debug!("Isolated environment at {}", root.display());

        Ok(Self {
            root,
            extensions_dir,
            user_data_dir,
            settings_path,
            env,
        })
    }

    /// Command-line arguments for the host, workspace last.
    pub fn host_args(&self, options: &LaunchOptions) -> Vec<String> {
        let mut args = vec![
            format!("--extensions-dir={}", self.extensions_dir.display()),
            format!("--user-data-dir={}", self.user_data_dir.display()),
            "--disable-workspace-trust".to_string(),
            "--skip-welcome".to_string(),
            "--skip-release-notes".to_string(),
            "--disable-telemetry".to_string(),
        ];

        if let Some(dev) = &options.extension_development_path {
            args.push(format!("--extensionDevelopmentPath={}", dev.display()));
        }

        args.extend(options.extra_args.iter().cloned());

        if let Some(workspace) = options.workspace.as_path() {
            args.push(workspace.display().to_string());
        }

        args
    }
}

/// Settings that keep first start quiet and deterministic.
fn settings_document(template_urls: &[TemplateSource]) -> Value {
    json!({
        (TEMPLATE_URLS_SETTING): template_urls,
        "workbench.startupEditor": "none",
        "workbench.tips.enabled": false,
        "telemetry.telemetryLevel": "off",
        "security.workspace.trust.enabled": false,
        "update.mode": "none",
        "extensions.autoCheckUpdates": false,
        "extensions.autoUpdate": false,
        "extensions.ignoreRecommendations": true,
        "git.openRepositoryInParentFolders": "never",
        "window.restoreWindows": "none",
    })
}

fn inherited_env() -> HarnessResult<Vec<(String, String)>> {
    unicode_env(std::env::vars_os())
}

/// The driver wire is JSON, so every inherited variable must be unicode.
/// Refuse to launch rather than hand the host a partial environment.
fn unicode_env(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> HarnessResult<Vec<(String, String)>> {
    vars.into_iter()
        .map(|(k, v)| {
            let key = k.into_string().map_err(|k| {
                HarnessError::InvalidConfig(format!(
                    "environment variable name {:?} is not valid unicode",
                    k
                ))
            })?;
            let value = v.into_string().map_err(|_| {
                HarnessError::InvalidConfig(format!(
                    "environment variable {} is not valid unicode",
                    key
                ))
            })?;
            Ok((key, value))
        })
        .collect()
}

/// Copy the inherited environment and prepend `companion` to the search path.
fn build_env(
    inherited: Vec<(String, String)>,
    companion: Option<&Path>,
) -> HarnessResult<HashMap<String, String>> {
    let mut env: HashMap<String, String> = inherited.into_iter().collect();

    let Some(companion) = companion else {
        return Ok(env);
    };

    // Windows spells it `Path`; reuse whatever key is already there.
    let key = env
        .keys()
        .find(|k| k.eq_ignore_ascii_case("PATH"))
        .cloned()
        .unwrap_or_else(|| "PATH".to_string());

    let existing = OsString::from(env.get(&key).cloned().unwrap_or_default());
    let entries =
        std::iter::once(companion.to_path_buf()).chain(std::env::split_paths(&existing));

    let joined = std::env::join_paths(entries)
        .map_err(|e| HarnessError::InvalidConfig(format!("companion dir: {}", e)))?
        .into_string()
        .map_err(|_| HarnessError::InvalidConfig("PATH is not valid unicode".into()))?;

    env.insert(key, joined);
    Ok(env)
}

/// A launched host bound to its isolated environment
pub struct AppHandle {
    process: Box<dyn HostProcess>,
    surface: Arc<dyn Surface>,
    environment: IsolatedEnvironment,
    closed: bool,
}

impl AppHandle {
    /// The host's main window.
    pub fn surface(&self) -> Arc<dyn Surface> {
        Arc::clone(&self.surface)
    }

    /// Isolated extension storage directory.
    pub fn storage_dir(&self) -> &Path {
        &self.environment.extensions_dir
    }

    pub fn environment(&self) -> &IsolatedEnvironment {
        &self.environment
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close the host. Later calls do nothing; the isolated root stays on disk.
    pub async fn teardown(&mut self) -> HarnessResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        info!("Tearing down host (pid: {:?})", self.process.pid());
        self.process.close().await
    }
}

impl Drop for AppHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!(
                "Host handle dropped without teardown (pid: {:?})",
                self.process.pid()
            );
        }
    }
}

/// Launch the host in a brand-new isolated environment.
///
/// Any failure to start the process or to get its first window becomes
/// [`HarnessError::LaunchFailure`]; a process that started but never showed a
/// window is closed before returning.
pub async fn launch(
    driver: &dyn AutomationDriver,
    options: &LaunchOptions,
) -> HarnessResult<AppHandle> {
    let environment = IsolatedEnvironment::create(options)?;
    launch_in(driver, options, environment).await
}

/// Launch into an environment the caller already created.
pub async fn launch_in(
    driver: &dyn AutomationDriver,
    options: &LaunchOptions,
    environment: IsolatedEnvironment,
) -> HarnessResult<AppHandle> {
    let request = LaunchRequest {
        executable_path: options.executable_path.clone(),
        env: environment.env.clone(),
        args: environment.host_args(options),
        timeout: options.startup_timeout,
    };

    info!(
        "Launching host{} with workspace {:?}",
        options
            .executable_path
            .as_ref()
            .map(|p| format!(" {}", p.display()))
            .unwrap_or_default(),
        options.workspace.as_path()
    );

    let process = driver.launch(request).await.map_err(as_launch_failure)?;

    let surface = match process.first_window().await {
        Ok(surface) => surface,
        Err(e) => {
            if let Err(close_err) = process.close().await {
                warn!("Closing half-started host failed: {}", close_err);
            }
            return Err(as_launch_failure(e));
        }
    };

    info!("Host ready (pid: {:?})", process.pid());

    Ok(AppHandle {
        process,
        surface,
        environment,
        closed: false,
    })
}

fn as_launch_failure(e: HarnessError) -> HarnessError {
    match e {
        HarnessError::LaunchFailure(_) => e,
        other => HarnessError::LaunchFailure(other.to_string()),
    }
}

/// Remove a stale scenario workspace and recreate it empty.
pub async fn reset_workspace(path: &Path) -> HarnessResult<()> {
    if tokio::fs::try_exists(path).await? {
        debug!("Removing stale workspace {}", path.display());
        tokio::fs::remove_dir_all(path).await?;
    }
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Workspace;
    use tempfile::TempDir;

    fn options() -> LaunchOptions {
        LaunchOptions {
            template_urls: vec![TemplateSource {
                name: "local".into(),
                url: "https://example.com/templates.json".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_create_lays_out_profile() {
        let tmp = TempDir::new().unwrap();
        let env = IsolatedEnvironment::create_in(tmp.path(), &options()).unwrap();

        assert!(env.root.starts_with(tmp.path()));
        assert!(env.extensions_dir.is_dir());
        assert!(env.user_data_dir.join("User").is_dir());

        let settings: Value =
            serde_json::from_str(&std::fs::read_to_string(&env.settings_path).unwrap()).unwrap();
        assert_eq!(
            settings[TEMPLATE_URLS_SETTING][0]["url"],
            "https://example.com/templates.json"
        );
        assert_eq!(settings["telemetry.telemetryLevel"], "off");
        assert_eq!(settings["security.workspace.trust.enabled"], false);
        assert_eq!(settings["update.mode"], "none");
    }

    #[test]
    fn test_each_environment_gets_its_own_root() {
        let tmp = TempDir::new().unwrap();
        let a = IsolatedEnvironment::create_in(tmp.path(), &options()).unwrap();
        let b = IsolatedEnvironment::create_in(tmp.path(), &options()).unwrap();
        assert_ne!(a.root, b.root);
    }

    #[test]
    fn test_build_env_prepends_companion_dir() {
        let inherited = vec![
            ("HOME".to_string(), "/home/ci".to_string()),
            ("PATH".to_string(), std::env::join_paths(["/usr/bin", "/bin"]).unwrap().into_string().unwrap()),
        ];
        let env = build_env(inherited, Some(Path::new("/opt/editor/bin"))).unwrap();

        assert_eq!(env["HOME"], "/home/ci");
        let paths: Vec<PathBuf> = std::env::split_paths(&env["PATH"]).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/opt/editor/bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin")
            ]
        );
    }

    #[test]
    fn test_build_env_reuses_windows_path_key() {
        let inherited = vec![("Path".to_string(), "C:\\Windows".to_string())];
        let env = build_env(inherited, Some(Path::new("bin"))).unwrap();
        assert!(env.contains_key("Path"));
        assert!(!env.contains_key("PATH"));
        assert!(env["Path"].starts_with("bin"));
    }

    #[test]
    fn test_build_env_without_companion_is_untouched() {
        let inherited = vec![("PATH".to_string(), "/usr/bin".to_string())];
        let env = build_env(inherited, None).unwrap();
        assert_eq!(env["PATH"], "/usr/bin");
    }

    #[test]
    fn test_unicode_env_keeps_every_variable() {
        let vars = vec![
            (OsString::from("HOME"), OsString::from("/home/ci")),
            (OsString::from("LANG"), OsString::from("C.UTF-8")),
        ];
        let env = unicode_env(vars).unwrap();
        assert_eq!(env.len(), 2);
        assert!(env.contains(&("LANG".to_string(), "C.UTF-8".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn test_unicode_env_rejects_non_unicode_value() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("HOME"), OsString::from("/home/ci")),
            (OsString::from("RAW_BYTES"), OsString::from_vec(vec![0xff, 0xfe])),
        ];
        match unicode_env(vars) {
            Err(HarnessError::InvalidConfig(msg)) => assert!(msg.contains("RAW_BYTES")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unicode_env_rejects_non_unicode_name() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![(OsString::from_vec(vec![b'K', 0xff]), OsString::from("v"))];
        assert!(matches!(unicode_env(vars), Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn test_host_args_put_workspace_last() {
        let tmp = TempDir::new().unwrap();
        let mut opts = options();
        opts.workspace = Workspace::Path(PathBuf::from("/work/project"));
        opts.extension_development_path = Some(PathBuf::from("/src/ext"));
        opts.extra_args = vec!["--verbose".into()];

        let env = IsolatedEnvironment::create_in(tmp.path(), &opts).unwrap();
        let args = env.host_args(&opts);

        assert!(args[0].starts_with("--extensions-dir="));
        assert!(args.contains(&"--disable-workspace-trust".to_string()));
        assert!(args.contains(&"--extensionDevelopmentPath=/src/ext".to_string()));
        assert_eq!(args[args.len() - 2], "--verbose");
        assert_eq!(args.last().unwrap(), "/work/project");
    }

    #[test]
    fn test_host_args_without_workspace() {
        let tmp = TempDir::new().unwrap();
        let opts = options();
        let env = IsolatedEnvironment::create_in(tmp.path(), &opts).unwrap();
        let args = env.host_args(&opts);
        assert!(args.iter().all(|a| a.starts_with("--")));
    }

    #[tokio::test]
    async fn test_reset_workspace_clears_stale_content() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("scenario");
        std::fs::create_dir_all(ws.join("old")).unwrap();
        std::fs::write(ws.join("main.tsp"), "stale").unwrap();

        reset_workspace(&ws).await.unwrap();

        assert!(ws.is_dir());
        assert_eq!(std::fs::read_dir(&ws).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_reset_workspace_creates_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("a").join("b");
        reset_workspace(&ws).await.unwrap();
        assert!(ws.is_dir());
    }
}
