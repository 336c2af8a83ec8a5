//! Per-run scenario context tying launch, polling, and capture together

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::capture::{CaptureContext, Category, ScreenGrabber};
use crate::config::{HarnessConfig, LaunchOptions};
use crate::driver::{AutomationDriver, Surface};
use crate::error::HarnessResult;
use crate::fixture::{self, AppHandle};
use crate::poll::{poll_or_else, RetryBudget};

/// Frame captured when a poll runs out of attempts.
pub const ERROR_FRAME: &str = "error.png";

/// What `launch` hands back to scenario code
#[derive(Clone)]
pub struct LaunchedApp {
    pub surface: Arc<dyn Surface>,
    pub storage_dir: PathBuf,
}

/// Everything one scenario run needs, passed explicitly to each step
///
/// Create one per run, `set_category` once, then for each scenario `set_dir`,
/// `launch`, poll/capture as needed, `flush`, and `teardown`.
pub struct ScenarioContext<G> {
    config: HarnessConfig,
    capture: CaptureContext<G>,
    app: Option<AppHandle>,
}

impl<G: ScreenGrabber> ScenarioContext<G> {
    pub fn new(config: HarnessConfig, grabber: G) -> Self {
        let capture = CaptureContext::new(&config, grabber);
        Self {
            config,
            capture,
            app: None,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn set_category(&mut self, category: Category) {
        self.capture.set_category(category);
    }

    /// Start a new case; returns its directory name.
    pub fn set_dir(&mut self, case_name: &str) -> String {
        let dir = self.capture.set_dir(case_name).dir_name();
        info!("Case {}", dir);
        dir
    }

    pub async fn capture(&mut self, file_name: &str) -> HarnessResult<()> {
        self.capture.capture(file_name).await
    }

    pub async fn flush(&self) -> HarnessResult<Vec<PathBuf>> {
        self.capture.flush().await
    }

    pub fn captures(&self) -> &CaptureContext<G> {
        &self.capture
    }

    /// Launch the host in a fresh isolated environment.
    ///
    /// A host still open from an earlier launch is torn down first.
    pub async fn launch(
        &mut self,
        driver: &dyn AutomationDriver,
        options: &LaunchOptions,
    ) -> HarnessResult<LaunchedApp> {
        self.teardown().await?;
        self.app = None;

        let app = fixture::launch(driver, options).await?;
        let launched = LaunchedApp {
            surface: app.surface(),
            storage_dir: app.storage_dir().to_path_buf(),
        };
        self.app = Some(app);
        Ok(launched)
    }

    pub fn app(&self) -> Option<&AppHandle> {
        self.app.as_ref()
    }

    pub fn surface(&self) -> Option<Arc<dyn Surface>> {
        self.app.as_ref().map(AppHandle::surface)
    }

    /// Poll `predicate` up to `count` times, `gap` apart (config default when
    /// `None`).
    ///
    /// On exhaustion this captures `error.png`, flushes every buffered frame,
    /// and tears the host down, in that order, before returning
    /// `PollExhausted`. Predicate errors come back unchanged with none of that.
    pub async fn poll<P, Fut>(
        &mut self,
        count: u32,
        predicate: P,
        message: &str,
        gap: Option<Duration>,
    ) -> HarnessResult<u32>
    where
        P: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<bool>>,
    {
        let budget = RetryBudget::new(count, gap.unwrap_or(self.config.poll_interval));
        let this = &mut *self;
        poll_or_else(budget, message, predicate, move |_| async move {
            this.on_exhaustion().await
        })
        .await
    }

    async fn on_exhaustion(&mut self) {
        if let Err(e) = self.capture.capture(ERROR_FRAME).await {
            warn!("Failure screenshot not taken: {}", e);
        }

        match self.capture.flush().await {
            Ok(paths) => info!("Saved {} diagnostic frame(s)", paths.len()),
            Err(e) => warn!("Diagnostic flush failed: {}", e),
        }

        if let Err(e) = self.teardown().await {
            warn!("Teardown after failed poll: {}", e);
        }
    }

    /// Close the host if one is open.
    pub async fn teardown(&mut self) -> HarnessResult<()> {
        match self.app.as_mut() {
            Some(app) => app.teardown().await,
            None => Ok(()),
        }
    }
}
