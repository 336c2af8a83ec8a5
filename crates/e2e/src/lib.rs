//! Editor E2E Test Harness
//!
//! This crate drives a desktop code editor through an automation driver and
//! keeps screenshot evidence of what happened:
//! - Launches the host in a fresh, isolated profile per run
//! - Polls asynchronous UI conditions under a bounded retry budget
//! - Buffers whole-screen captures and flushes them in capture order
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  ScenarioContext (one per run)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  launch(driver, options) -> LaunchedApp { surface, storage } │
//! │    └── fixture: IsolatedEnvironment + settings.json + env   │
//! │  poll(count, predicate, message, gap?)                      │
//! │    └── on exhaustion: capture error.png -> flush -> teardown│
//! │  set_category / set_dir / capture / flush                   │
//! │    └── images-<platform>/<category>/<case>_<time>/<n>_x.png │
//! ├─────────────────────────────────────────────────────────────┤
//! │  AutomationDriver ── PlaywrightDriver (Node bridge)         │
//! │  ScreenGrabber    ── CommandGrabber (OS screenshot tool)    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod driver;
pub mod error;
pub mod fixture;
pub mod playwright;
pub mod poll;
pub mod scenario;
pub mod segments;

pub use capture::{CaptureContext, Category, CommandGrabber, ScreenGrabber};
pub use config::{HarnessConfig, LaunchOptions, Workspace};
pub use driver::{AutomationDriver, HostProcess, LaunchRequest, Surface};
pub use error::{HarnessError, HarnessResult};
pub use poll::{poll, poll_or_else, PollOutcome, RetryBudget};
pub use scenario::{LaunchedApp, ScenarioContext};
