//! Screenshot buffering and ordered persistence
//!
//! `capture` grabs the whole display and keeps the PNG in memory. Nothing is
//! written until `flush`, which sorts frames by capture time and writes them as
//! `<ordinal>_<file>.png`, so a directory listing reproduces capture order no
//! matter in which order the writes land.
//!
//! ```text
//! <artifact_root>/images-<platform>/<category>/<case>_<HH_MM_SS_mmm>/
//!     0_started.png
//!     1_template-picked.png
//!     2_error.png
//!     manifest.json
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use image::GenericImageView;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::segments::SegmentedPath;

/// Scenario family; selects the directory under the image root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Create,
    Emit,
    Import,
    Preview,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Create,
        Category::Emit,
        Category::Import,
        Category::Preview,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Create => "create",
            Category::Emit => "emit",
            Category::Import => "import",
            Category::Preview => "preview",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HarnessError::UnknownCategory(s.to_string()))
    }
}

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("static regex"));

/// One scenario run's output directory name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDirectory {
    name: String,
    started_at: DateTime<Local>,
}

impl CaseDirectory {
    pub fn new(name: &str, started_at: DateTime<Local>) -> Self {
        Self {
            name: UNSAFE_NAME_CHARS.replace_all(name.trim(), "_").into_owned(),
            started_at,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<name>_<HH_MM_SS_mmm>`
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.name, self.started_at.format("%H_%M_%S_%3f"))
    }
}

/// One buffered screenshot
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub image: Vec<u8>,
    pub file_name: String,
    pub captured_at: DateTime<Utc>,
}

/// Entry in a case's `manifest.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub ordinal: usize,
    pub file: String,
    pub captured_at: DateTime<Utc>,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseManifest {
    pub category: Category,
    pub case: String,
    pub frames: Vec<FrameRecord>,
}

pub const MANIFEST_FILE: &str = "manifest.json";

/// Source of whole-display screenshots
#[async_trait]
pub trait ScreenGrabber: Send + Sync {
    /// PNG bytes of the entire display.
    async fn grab(&self) -> HarnessResult<Vec<u8>>;
}

/// Grabs the screen with the platform's screenshot tool
///
/// macOS uses `screencapture`, Windows a PowerShell `System.Drawing` snippet,
/// everything else ImageMagick's `import -window root`.
#[derive(Debug, Clone, Default)]
pub struct CommandGrabber {
    /// Replacement command; `{file}` in the args is swapped for the output path
    pub custom: Option<(String, Vec<String>)>,
}

impl CommandGrabber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_command(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            custom: Some((program.into(), args)),
        }
    }

    fn command_for(&self, file: &Path) -> (String, Vec<String>) {
        let target = file.to_string_lossy().to_string();

        if let Some((program, args)) = &self.custom {
            let args = args.iter().map(|a| a.replace("{file}", &target)).collect();
            return (program.clone(), args);
        }

        if cfg!(target_os = "macos") {
            ("screencapture".into(), vec!["-x".into(), "-t".into(), "png".into(), target])
        } else if cfg!(windows) {
            let script = format!(
                "Add-Type -AssemblyName System.Windows.Forms,System.Drawing; \
                 $b = [System.Windows.Forms.SystemInformation]::VirtualScreen; \
                 $bmp = New-Object System.Drawing.Bitmap $b.Width, $b.Height; \
                 $g = [System.Drawing.Graphics]::FromImage($bmp); \
                 $g.CopyFromScreen($b.Left, $b.Top, 0, 0, $bmp.Size); \
                 $bmp.Save('{}', [System.Drawing.Imaging.ImageFormat]::Png)",
                target.replace('\'', "''")
            );
            ("powershell".into(), vec!["-NoProfile".into(), "-Command".into(), script])
        } else {
            ("import".into(), vec!["-window".into(), "root".into(), target])
        }
    }
}

#[async_trait]
impl ScreenGrabber for CommandGrabber {
    async fn grab(&self) -> HarnessResult<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("screen.png");
        let (program, args) = self.command_for(&file);

        let output = Command::new(&program)
            .args(&args)
            .output()
            .await
            .map_err(|e| HarnessError::ScreenGrab(format!("{}: {}", program, e)))?;

        if !output.status.success() {
            return Err(HarnessError::ScreenGrab(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let bytes = tokio::fs::read(&file).await?;
        let decoded = image::load_from_memory(&bytes)?;
        let (width, height) = decoded.dimensions();
        debug!("Grabbed screen {}x{}", width, height);

        Ok(bytes)
    }
}

/// Capture state for one run: category, current case, and the frame buffer
///
/// Lifecycle: `set_category` once, then per scenario `set_dir`, any number of
/// `capture`s, and `flush`.
pub struct CaptureContext<G> {
    images_root: PathBuf,
    settle_delay: Duration,
    grabber: G,
    category: Option<Category>,
    case: Option<CaseDirectory>,
    frames: Vec<CapturedFrame>,
}

impl<G: ScreenGrabber> CaptureContext<G> {
    pub fn new(config: &HarnessConfig, grabber: G) -> Self {
        Self {
            images_root: config.images_root(),
            settle_delay: config.settle_delay,
            grabber,
            category: None,
            case: None,
            frames: Vec::new(),
        }
    }

    pub fn set_category(&mut self, category: Category) {
        self.category = Some(category);
    }

    pub fn category(&self) -> Option<Category> {
        self.category
    }

    /// Start a new case. Frames buffered for the previous case are dropped.
    pub fn set_dir(&mut self, case_name: &str) -> &CaseDirectory {
        if !self.frames.is_empty() {
            debug!("Discarding {} unflushed frame(s)", self.frames.len());
        }
        self.frames.clear();
        self.case.insert(CaseDirectory::new(case_name, Local::now()))
    }

    pub fn case(&self) -> Option<&CaseDirectory> {
        self.case.as_ref()
    }

    /// Directory the current case flushes into.
    pub fn case_path(&self) -> HarnessResult<PathBuf> {
        let category = self.category.ok_or(HarnessError::CategoryNotSet)?;
        let case = self.case.as_ref().ok_or(HarnessError::CaseNotStarted)?;
        Ok(self
            .images_root
            .join(category.as_str())
            .join(case.dir_name()))
    }

    /// Frames waiting for `flush`.
    pub fn pending(&self) -> &[CapturedFrame] {
        &self.frames
    }

    /// Wait for the settle delay, grab the display, and buffer the frame.
    pub async fn capture(&mut self, file_name: &str) -> HarnessResult<()> {
        if self.case.is_none() {
            return Err(HarnessError::CaseNotStarted);
        }
        let file_name = png_file_name(check_frame_name(file_name)?);

        tokio::time::sleep(self.settle_delay).await;
        let image = self.grabber.grab().await?;

        self.push_frame(CapturedFrame {
            image,
            file_name,
            captured_at: Utc::now(),
        });
        Ok(())
    }

    pub(crate) fn push_frame(&mut self, frame: CapturedFrame) {
        debug!(file = %frame.file_name, "Buffered frame #{}", self.frames.len());
        self.frames.push(frame);
    }

    /// Write buffered frames in capture order and return their paths.
    ///
    /// The buffer is kept; only `set_dir` clears it. An empty buffer writes
    /// nothing.
    pub async fn flush(&self) -> HarnessResult<Vec<PathBuf>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }

        let case_dir = self.case_path()?;
        tokio::fs::create_dir_all(&case_dir).await?;

        let mut ordered: Vec<&CapturedFrame> = self.frames.iter().collect();
        ordered.sort_by_key(|f| f.captured_at);

        let mut written = Vec::with_capacity(ordered.len());
        let mut records = Vec::with_capacity(ordered.len());

        for (ordinal, frame) in ordered.into_iter().enumerate() {
            let target = SegmentedPath::from_path(&case_dir.join(&frame.file_name))
                .with_ordinal(ordinal)
                .to_path_buf();

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, &frame.image).await?;

            records.push(FrameRecord {
                ordinal,
                file: target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                captured_at: frame.captured_at,
                sha256: sha256_hex(&frame.image),
            });
            written.push(target);
        }

        let manifest = CaseManifest {
            category: self.category.ok_or(HarnessError::CategoryNotSet)?,
            case: self
                .case
                .as_ref()
                .map(|c| c.dir_name())
                .unwrap_or_default(),
            frames: records,
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        tokio::fs::write(case_dir.join(MANIFEST_FILE), json).await?;

        info!("Flushed {} frame(s) to {}", written.len(), case_dir.display());
        Ok(written)
    }
}

/// Ordinal prefix of a flushed frame file, e.g. `12` for `12_error.png`.
pub fn frame_ordinal(path: &Path) -> Option<usize> {
    let name = path.file_name()?.to_str()?;
    name.split_once('_')?.0.parse().ok()
}

/// Every flushed frame under `root`, grouped by case directory in ordinal order.
pub fn collect_frames(root: &Path) -> HarnessResult<BTreeMap<PathBuf, Vec<PathBuf>>> {
    let mut cases: BTreeMap<PathBuf, Vec<(usize, PathBuf)>> = BTreeMap::new();
    if !root.exists() {
        return Ok(BTreeMap::new());
    }

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();

        let is_png = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if !entry.file_type().is_file() || !is_png {
            continue;
        }

        if let (Some(ordinal), Some(parent)) = (frame_ordinal(path), path.parent()) {
            cases
                .entry(parent.to_path_buf())
                .or_default()
                .push((ordinal, path.to_path_buf()));
        }
    }

    Ok(cases
        .into_iter()
        .map(|(case, mut frames)| {
            frames.sort_by_key(|(ordinal, _)| *ordinal);
            (case, frames.into_iter().map(|(_, p)| p).collect())
        })
        .collect())
}

/// Frame names are relative to the case directory and may not climb out of it.
fn check_frame_name(name: &str) -> HarnessResult<&str> {
    let path = Path::new(name);
    let contained = path.components().next().is_some()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if contained {
        Ok(name)
    } else {
        Err(HarnessError::InvalidConfig(format!(
            "frame name {:?} must be a relative path inside the case directory",
            name
        )))
    }
}

fn png_file_name(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(".png") {
        name.to_string()
    } else {
        format!("{}.png", name)
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
