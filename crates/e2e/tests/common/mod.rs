//! In-process stand-ins for the automation driver and the screen grabber.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;

use editor_e2e::capture::collect_frames;
use editor_e2e::{
    AutomationDriver, HarnessConfig, HarnessError, HarnessResult, HostProcess, LaunchRequest,
    ScreenGrabber, Surface,
};

/// Ordered log of everything the fakes saw.
#[derive(Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeGrabber {
    pub events: Events,
    pub fail: bool,
}

#[async_trait]
impl ScreenGrabber for FakeGrabber {
    async fn grab(&self) -> HarnessResult<Vec<u8>> {
        if self.fail {
            self.events.push("grab failed");
            return Err(HarnessError::ScreenGrab("no display".into()));
        }
        self.events.push("grab");
        Ok(b"\x89PNG fake".to_vec())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LaunchBehaviour {
    Ready,
    ProcessFails,
    WindowNeverAppears,
}

pub struct FakeDriver {
    pub events: Events,
    pub behaviour: LaunchBehaviour,
    /// Where flushed frames land; checked when the host is closed
    pub images_root: PathBuf,
    pub last_request: Mutex<Option<LaunchRequest>>,
}

impl FakeDriver {
    pub fn new(events: Events, behaviour: LaunchBehaviour, images_root: PathBuf) -> Self {
        Self {
            events,
            behaviour,
            images_root,
            last_request: Mutex::new(None),
        }
    }

    pub fn request(&self) -> LaunchRequest {
        self.last_request
            .lock()
            .unwrap()
            .clone()
            .expect("launch was called")
    }
}

#[async_trait]
impl AutomationDriver for FakeDriver {
    async fn launch(&self, request: LaunchRequest) -> HarnessResult<Box<dyn HostProcess>> {
        let settings_written = request
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--user-data-dir="))
            .map(|dir| Path::new(dir).join("User").join("settings.json").is_file())
            .unwrap_or(false);
        self.events.push(format!("launch settings_written={}", settings_written));
        *self.last_request.lock().unwrap() = Some(request);

        if self.behaviour == LaunchBehaviour::ProcessFails {
            return Err(HarnessError::Driver("spawn ENOENT".into()));
        }

        Ok(Box::new(FakeProcess {
            events: self.events.clone(),
            behaviour: self.behaviour,
            images_root: self.images_root.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct FakeProcess {
    events: Events,
    behaviour: LaunchBehaviour,
    images_root: PathBuf,
    closed: AtomicBool,
}

#[async_trait]
impl HostProcess for FakeProcess {
    async fn first_window(&self) -> HarnessResult<Arc<dyn Surface>> {
        if self.behaviour == LaunchBehaviour::WindowNeverAppears {
            self.events.push("first_window timeout");
            return Err(HarnessError::Driver("Timeout 30000ms exceeded".into()));
        }
        self.events.push("first_window");
        Ok(Arc::new(FakeSurface {
            events: self.events.clone(),
        }))
    }

    async fn close(&self) -> HarnessResult<()> {
        let error_frame_on_disk = collect_frames(&self.images_root)
            .unwrap()
            .values()
            .flatten()
            .any(|p| p.to_string_lossy().ends_with("_error.png"));
        let already = self.closed.swap(true, Ordering::SeqCst);
        self.events.push(format!(
            "close error_frame_on_disk={} already_closed={}",
            error_frame_on_disk, already
        ));
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(4242)
    }
}

pub struct FakeSurface {
    events: Events,
}

#[async_trait]
impl Surface for FakeSurface {
    async fn title(&self) -> HarnessResult<String> {
        Ok("Welcome - Editor".into())
    }

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool> {
        self.events.push(format!("is_visible {}", selector));
        Ok(false)
    }

    async fn click(&self, selector: &str) -> HarnessResult<()> {
        self.events.push(format!("click {}", selector));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()> {
        self.events.push(format!("fill {} {}", selector, value));
        Ok(())
    }

    async fn press(&self, key: &str) -> HarnessResult<()> {
        self.events.push(format!("press {}", key));
        Ok(())
    }
}

/// Harness config writing under `root` with no settle delay.
pub fn test_config(root: &Path) -> HarnessConfig {
    HarnessConfig {
        artifact_root: root.to_path_buf(),
        platform: "test".into(),
        settle_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}
