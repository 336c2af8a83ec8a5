//! Playwright Electron automation
//!
//! Playwright has no Rust API, so the driver writes a small Node bridge script
//! and keeps it running for the lifetime of one host process. Requests and
//! responses are single JSON lines on the bridge's stdin/stdout:
//!
//! ```text
//! -> {"id":1,"op":"launch","executablePath":"...","env":{...},"args":[...],"timeout":60000}
//! <- {"id":1,"ok":true,"value":4242}
//! -> {"id":2,"op":"isVisible","selector":"role=tree"}
//! <- {"id":2,"ok":false,"error":"Target closed"}
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{AutomationDriver, HostProcess, LaunchRequest, Surface};
use crate::error::{HarnessError, HarnessResult};

const BRIDGE_SCRIPT: &str = r#"
const readline = require('readline');
const { _electron: electron } = require(require.resolve('playwright', { paths: [process.cwd()] }));

let app = null;
let page = null;

function reply(id, ok, value, error, done) {
  process.stdout.write(JSON.stringify({ id, ok, value, error }) + '\n', done);
}

function requirePage() {
  if (!page) throw new Error('no window yet; call firstWindow first');
  return page;
}

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let req;
  try { req = JSON.parse(line); } catch (e) { return; }
  try {
    let value = null;
    switch (req.op) {
      case 'launch':
        app = await electron.launch({
          executablePath: req.executablePath || undefined,
          env: req.env,
          args: req.args,
          timeout: req.timeout,
        });
        value = app.process().pid;
        break;
      case 'firstWindow':
        page = await app.firstWindow({ timeout: req.timeout });
        break;
      case 'title':
        value = await requirePage().title();
        break;
      case 'isVisible':
        value = await requirePage().locator(req.selector).first().isVisible();
        break;
      case 'click':
        await requirePage().locator(req.selector).first().click();
        break;
      case 'fill':
        await requirePage().locator(req.selector).first().fill(req.value);
        break;
      case 'press':
        await requirePage().keyboard.press(req.key);
        break;
      case 'close':
        if (app) await app.close();
        app = null;
        reply(req.id, true, null, undefined, () => process.exit(0));
        return;
      default:
        throw new Error('unknown op: ' + req.op);
    }
    reply(req.id, true, value);
  } catch (error) {
    reply(req.id, false, null, error.message);
  }
});
"#;

/// Configuration for the Playwright bridge
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node executable
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub working_dir: PathBuf,

    /// How long `close` may take before the bridge is killed
    pub close_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            working_dir: PathBuf::from("."),
            close_timeout: Duration::from_secs(10),
        }
    }
}

/// Launches Electron hosts through a Playwright bridge process
pub struct PlaywrightDriver {
    config: PlaywrightConfig,
}

impl PlaywrightDriver {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    /// Check if Playwright is installed
    async fn check_playwright_installed(&self) -> HarnessResult<()> {
        let status = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(&self.config.working_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(HarnessError::PlaywrightNotFound),
        }
    }

    async fn spawn_bridge(&self) -> HarnessResult<(Bridge, TempDir)> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        tokio::fs::write(&script_path, BRIDGE_SCRIPT).await?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = Command::new(&self.config.node_binary)
            .arg(&script_path)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                HarnessError::LaunchFailure(format!(
                    "Failed to spawn {}: {}",
                    self.config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HarnessError::Driver("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarnessError::Driver("bridge stdout unavailable".into()))?;

        Ok((
            Bridge {
                child,
                stdin,
                lines: BufReader::new(stdout).lines(),
                next_id: 1,
            },
            script_dir,
        ))
    }
}

#[async_trait]
impl AutomationDriver for PlaywrightDriver {
    async fn launch(&self, request: LaunchRequest) -> HarnessResult<Box<dyn HostProcess>> {
        self.check_playwright_installed().await?;

        let (bridge, script_dir) = self.spawn_bridge().await?;
        let bridge = Arc::new(Mutex::new(bridge));

        let params = json!({
            "executablePath": request.executable_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            "env": request.env,
            "args": request.args,
            "timeout": request.timeout.as_millis() as u64,
        });

        let launched = bridge.lock().await.call("launch", params).await;
        let pid = match launched {
            Ok(value) => value.as_u64().map(|p| p as u32),
            Err(e) => {
                bridge.lock().await.terminate().await;
                return Err(HarnessError::LaunchFailure(e.to_string()));
            }
        };

        info!("Host launched (pid: {:?})", pid);

        Ok(Box::new(PlaywrightProcess {
            bridge,
            pid,
            window_timeout: request.timeout,
            close_timeout: self.config.close_timeout,
            _script_dir: script_dir,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Connection to one running bridge process
struct Bridge {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl Bridge {
    async fn call(&mut self, op: &str, params: Value) -> HarnessResult<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = json!({ "id": id, "op": op });
        if let (Some(obj), Value::Object(extra)) = (request.as_object_mut(), params) {
            obj.extend(extra);
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;

        loop {
            let Some(raw) = self.lines.next_line().await? else {
                return Err(HarnessError::Driver(format!("bridge exited during '{}'", op)));
            };

            let response: BridgeResponse = match serde_json::from_str(&raw) {
                Ok(r) => r,
                Err(_) => {
                    debug!("[bridge] {}", raw);
                    continue;
                }
            };

            if response.id != id {
                warn!("Dropping stale bridge response {} (waiting for {})", response.id, id);
                continue;
            }

            return if response.ok {
                Ok(response.value)
            } else {
                Err(HarnessError::Driver(
                    response.error.unwrap_or_else(|| format!("'{}' failed", op)),
                ))
            };
        }
    }

    /// Stop the bridge: SIGTERM first, then kill.
    async fn terminate(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                && tokio::time::timeout(Duration::from_millis(500), self.child.wait())
                    .await
                    .is_ok()
            {
                return;
            }
        }

        let _ = self.child.kill().await;
    }
}

/// A host process driven through the bridge
pub struct PlaywrightProcess {
    bridge: Arc<Mutex<Bridge>>,
    pid: Option<u32>,
    window_timeout: Duration,
    close_timeout: Duration,
    _script_dir: TempDir,
}

#[async_trait]
impl HostProcess for PlaywrightProcess {
    async fn first_window(&self) -> HarnessResult<Arc<dyn Surface>> {
        let params = json!({ "timeout": self.window_timeout.as_millis() as u64 });
        self.bridge.lock().await.call("firstWindow", params).await?;

        Ok(Arc::new(PlaywrightSurface {
            bridge: Arc::clone(&self.bridge),
        }))
    }

    async fn close(&self) -> HarnessResult<()> {
        let mut bridge = self.bridge.lock().await;
        info!("Closing host (pid: {:?})", self.pid);

        match tokio::time::timeout(self.close_timeout, bridge.call("close", json!({}))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Host close reported: {}", e),
            Err(_) => warn!("Host did not close within {:?}", self.close_timeout),
        }

        if matches!(bridge.child.try_wait(), Ok(None)) {
            bridge.terminate().await;
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// The host's first window, as seen by Playwright
pub struct PlaywrightSurface {
    bridge: Arc<Mutex<Bridge>>,
}

impl PlaywrightSurface {
    async fn call(&self, op: &str, params: Value) -> HarnessResult<Value> {
        self.bridge.lock().await.call(op, params).await
    }
}

#[async_trait]
impl Surface for PlaywrightSurface {
    async fn title(&self) -> HarnessResult<String> {
        let value = self.call("title", json!({})).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        let value = self.call("isVisible", json!({ "selector": selector })).await?;
        value
            .as_bool()
            .ok_or_else(|| HarnessError::Driver(format!("isVisible returned {}", value)))
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.call("click", json!({ "selector": selector })).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.call("fill", json!({ "selector": selector, "value": value })).await?;
        Ok(())
    }

    async fn press(&self, key: &str) -> HarnessResult<()> {
        self.call("press", json!({ "key": key })).await?;
        Ok(())
    }
}
