use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::validation::sanitize_for_log;

/// Piper output smaller than this is treated as a failed synthesis.
const MIN_AUDIO_BYTES: u64 = 1000;
pub const AUDIO_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#+\s+(.*?)\n").unwrap());
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[-*]\s+(.*?)\n").unwrap());
static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]*`").unwrap());
static LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static PARAGRAPH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").unwrap());
static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[^a-zA-Z0-9\s.,!?;:áàâãéèêíïóôõöúçñÁÀÂÃÉÈÊÍÏÓÔÕÖÚÇÑ\-'"]"#).unwrap()
});
static DOTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.{2,}").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("piper not found: {0}")]
    NotFound(PathBuf),

    #[error("piper exited with {code:?}: {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("piper produced no usable audio ({0} bytes)")]
    NoAudio(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` and return the audio file name (relative to the
    /// served audio directory), or `None` when there was nothing to say.
    async fn synthesize(&self, text: &str) -> Result<Option<String>, SpeechError>;
}

/// Turn markdown-ish model output into plain prose a voice can read.
pub fn clean_text(text: &str) -> String {
    let text = HEADING.replace_all(text, "$1. ");
    let text = LIST_ITEM.replace_all(&text, "$1. ");
    let text = CODE_BLOCK.replace_all(&text, " code omitted. ");
    let text = INLINE_CODE.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = PARAGRAPH.replace_all(&text, "... ");
    let text = text.replace('\n', ". ");
    let text = DISALLOWED.replace_all(&text, "");
    let text = DOTS.replace_all(&text, ".");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

/// Runs the Piper CLI, one process per synthesis.
pub struct PiperSynthesizer {
    piper_dir: PathBuf,
    executable: PathBuf,
    model: PathBuf,
    audio_dir: PathBuf,
    counter: AtomicU64,
}

impl PiperSynthesizer {
    /// Locate the Piper executable and a `.onnx` voice in `piper_dir`, and
    /// make sure `audio_dir` exists.
    pub fn new(piper_dir: impl Into<PathBuf>, audio_dir: impl Into<PathBuf>) -> Result<Self, SpeechError> {
        let piper_dir = piper_dir.into();
        let audio_dir = audio_dir.into();

        let executable = piper_dir.join(if cfg!(windows) { "piper.exe" } else { "piper" });
        if !executable.is_file() {
            return Err(SpeechError::NotFound(executable));
        }
        let model = find_voice_model(&piper_dir)?.ok_or_else(|| SpeechError::NotFound(piper_dir.join("*.onnx")))?;
        std::fs::create_dir_all(&audio_dir)?;

        info!(executable = %executable.display(), model = %model.display(), "piper speech enabled");
        Ok(Self {
            piper_dir,
            executable,
            model,
            audio_dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }

    async fn run_piper(&self, text: &str, output: &Path) -> Result<(), SpeechError> {
        let mut child = tokio::process::Command::new(&self.executable)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(output)
            .current_dir(&self.piper_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes()).await?;
        }

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            return Err(SpeechError::ProcessFailed {
                code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SpeechSynthesizer for PiperSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Option<String>, SpeechError> {
        let clean = clean_text(text);
        if clean.is_empty() {
            return Ok(None);
        }

        let stamp = chrono::Utc::now().timestamp_millis();
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let temp = TempFile(self.piper_dir.join(format!("temp_{stamp}_{seq}.wav")));
        let file_name = format!("speech_{stamp}_{seq}.wav");

        debug!(text = %sanitize_for_log(&clean), "synthesizing speech");
        self.run_piper(&clean, &temp.0).await?;

        let size = tokio::fs::metadata(&temp.0).await.map(|m| m.len()).unwrap_or(0);
        if size <= MIN_AUDIO_BYTES {
            return Err(SpeechError::NoAudio(size));
        }

        let target = self.audio_dir.join(&file_name);
        if tokio::fs::rename(&temp.0, &target).await.is_err() {
            tokio::fs::copy(&temp.0, &target).await?;
        }
        info!(file = %file_name, bytes = size, "speech ready");
        Ok(Some(file_name))
    }
}

/// Removed on drop, so an aborted synthesis leaves nothing behind.
struct TempFile(PathBuf);

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn find_voice_model(dir: &Path) -> Result<Option<PathBuf>, SpeechError> {
    let mut models: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "onnx"))
        .collect();
    models.sort();
    Ok(models.into_iter().next())
}

/// Delete `.wav` files in `dir` last modified more than `max_age` ago.
/// Returns how many were removed.
pub async fn prune_older_than(dir: &Path, max_age: Duration) -> Result<usize, SpeechError> {
    let now = SystemTime::now();
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("wav") {
            continue;
        }
        let Ok(meta) = entry.metadata().await else { continue };
        if !meta.is_file() {
            continue;
        }
        let age = meta.modified().ok().and_then(|m| now.duration_since(m).ok());
        if age.is_some_and(|age| age > max_age) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old audio"),
            }
        }
    }
    if removed > 0 {
        info!(removed, dir = %dir.display(), "pruned old audio files");
    }
    Ok(removed)
}

/// Prune `dir` every `interval` until the process exits.
pub fn spawn_audio_pruner(dir: PathBuf, interval: Duration, max_age: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = prune_older_than(&dir, max_age).await {
                warn!(error = %e, "audio prune failed");
            }
        }
    })
}
