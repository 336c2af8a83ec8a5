//! Error types for the editor E2E harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    /// The host process or its main window never became available.
    #[error("Host failed to launch: {0}")]
    LaunchFailure(String),

    /// A bounded condition never became true within its retry budget.
    #[error("{message} (gave up after {attempts} attempt(s))")]
    PollExhausted { message: String, attempts: u32 },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Automation driver error: {0}")]
    Driver(String),

    #[error("Predicate failed: {0}")]
    Predicate(String),

    #[error("No case directory started; call set_dir first")]
    CaseNotStarted,

    #[error("No category selected; call set_category first")]
    CategoryNotSet,

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Screen grab failed: {0}")]
    ScreenGrab(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl HarnessError {
    /// True for the error raised when a poll budget runs out.
    pub fn is_poll_exhausted(&self) -> bool {
        matches!(self, HarnessError::PollExhausted { .. })
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
