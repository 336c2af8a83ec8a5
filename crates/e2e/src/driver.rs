//! Automation driver seam
//!
//! The harness only needs three things from a UI automation library: launch a
//! host process, get its first window, and poke at that window. Scenario code
//! holds trait objects so the harness can run against Playwright or an
//! in-process fake.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;

use crate::error::HarnessResult;

/// Everything the driver needs to start one host process
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Host executable; `None` lets the driver locate it
    pub executable_path: Option<PathBuf>,

    /// Full process environment (inherited variables included)
    pub env: HashMap<String, String>,

    pub args: Vec<String>,

    /// Driver-side startup timeout
    pub timeout: Duration,
}

#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn launch(&self, request: LaunchRequest) -> HarnessResult<Box<dyn HostProcess>>;
}

/// A running host application
#[async_trait]
pub trait HostProcess: Send + Sync {
    /// Wait for the main window; fails if it never shows up.
    async fn first_window(&self) -> HarnessResult<Arc<dyn Surface>>;

    async fn close(&self) -> HarnessResult<()>;

    fn pid(&self) -> Option<u32>;
}

/// The host's main interactive window
#[async_trait]
pub trait Surface: Send + Sync {
    async fn title(&self) -> HarnessResult<String>;

    async fn is_visible(&self, selector: &str) -> HarnessResult<bool>;

    async fn click(&self, selector: &str) -> HarnessResult<()>;

    async fn fill(&self, selector: &str, value: &str) -> HarnessResult<()>;

    /// Send a key chord to the focused element, e.g. `Control+Shift+P`.
    async fn press(&self, key: &str) -> HarnessResult<()>;
}
