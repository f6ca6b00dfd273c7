// src/clips.rs
// Alert clip library - list, upload and delete audio files in the alerts directory

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const UPLOAD_EXTENSION: &str = ".mp3";
const PLAYABLE_EXTENSIONS: [&str; 2] = [".mp3", ".wav"];
/// Rounds of re-listing when another writer takes the chosen name first
const MAX_NAME_ATTEMPTS: usize = 32;

/// A playable audio resource referenced by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertClip {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("Invalid clip name: {0}")]
    InvalidName(String),

    #[error("Clip not found: {0}")]
    NotFound(String),

    #[error("Clip is empty")]
    Empty,

    #[error("Clip storage error: {0}")]
    Io(String),
}

#[derive(Debug, Clone)]
pub struct ClipLibrary {
    dir: PathBuf,
}

impl ClipLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current playable clips, sorted by name
    pub async fn list(&self) -> Result<Vec<AlertClip>, ClipError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ClipError::Io(format!("{}: {}", self.dir.display(), e))),
        };

        let mut clips = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ClipError::Io(e.to_string()))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !is_playable(&name) {
                continue;
            }
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if is_file {
                clips.push(AlertClip {
                    path: entry.path(),
                    name,
                });
            }
        }

        clips.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clips)
    }

    /// Store `bytes` under a unique name derived from `requested`, returning it
    pub async fn upload(&self, requested: &str, bytes: &[u8]) -> Result<String, ClipError> {
        if bytes.is_empty() {
            return Err(ClipError::Empty);
        }

        let base = sanitize_name(requested)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ClipError::Io(e.to_string()))?;

        let candidate = with_upload_extension(&base);
        let mut attempts = 0;
        let (file_name, mut file) = loop {
            let existing = self.existing_names().await?;
            let file_name = unique_name(&candidate, &existing);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&file_name))
                .await
            {
                Ok(file) => break (file_name, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && attempts < MAX_NAME_ATTEMPTS => {
                    attempts += 1;
                    tracing::debug!("Clip name '{}' taken while uploading, picking another", file_name);
                }
                Err(e) => return Err(ClipError::Io(format!("{}: {}", file_name, e))),
            }
        };

        file.write_all(bytes)
            .await
            .map_err(|e| ClipError::Io(e.to_string()))?;
        file.flush().await.map_err(|e| ClipError::Io(e.to_string()))?;

        tracing::info!("Uploaded alert clip '{}' ({} bytes)", file_name, bytes.len());
        Ok(file_name)
    }

    /// Look up one playable clip by exact name
    pub async fn find(&self, name: &str) -> Result<AlertClip, ClipError> {
        let name = sanitize_name(name)?;
        self.list()
            .await?
            .into_iter()
            .find(|clip| clip.name == name)
            .ok_or(ClipError::NotFound(name))
    }

    pub async fn delete(&self, name: &str) -> Result<(), ClipError> {
        let name = sanitize_name(name)?;
        match tokio::fs::remove_file(self.dir.join(&name)).await {
            Ok(()) => {
                tracing::info!("Deleted alert clip '{}'", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ClipError::NotFound(name)),
            Err(e) => Err(ClipError::Io(e.to_string())),
        }
    }

    async fn existing_names(&self) -> Result<Vec<String>, ClipError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| ClipError::Io(e.to_string()))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ClipError::Io(e.to_string()))?
        {
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

pub fn is_playable(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    PLAYABLE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) && !name.starts_with('.')
}

fn sanitize_name(requested: &str) -> Result<String, ClipError> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| {
        Regex::new(r"^[^/\\\x00-\x1f]+$").expect("valid clip name regex")
    });

    // Keep only the final path component, as browsers do for uploaded files.
    let trimmed = requested.trim();
    let name = trimmed
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(trimmed)
        .trim();

    if name.is_empty() || name.starts_with('.') || !re.is_match(name) {
        return Err(ClipError::InvalidName(requested.to_string()));
    }
    Ok(name.to_string())
}

fn with_upload_extension(name: &str) -> String {
    if name.to_ascii_lowercase().ends_with(UPLOAD_EXTENSION) {
        name.to_string()
    } else {
        format!("{}{}", name, UPLOAD_EXTENSION)
    }
}

/// `x.mp3` -> `x_1.mp3` -> `x_2.mp3` ... until unused
fn unique_name(candidate: &str, existing: &[String]) -> String {
    if !existing.iter().any(|name| name == candidate) {
        return candidate.to_string();
    }

    let (stem, ext) = match candidate.rfind('.') {
        Some(idx) if idx > 0 => candidate.split_at(idx),
        _ => (candidate, ""),
    };

    (1u32..)
        .map(|counter| format!("{}_{}{}", stem, counter, ext))
        .find(|name| !existing.iter().any(|existing| existing == name))
        .unwrap_or_else(|| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_library() -> ClipLibrary {
        ClipLibrary::new(
            std::env::temp_dir().join(format!("pick-guard-clips-{}", uuid::Uuid::new_v4())),
        )
    }

    fn names(clips: &[AlertClip]) -> Vec<&str> {
        clips.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn upload_round_trip_deduplicates() {
        let library = scratch_library();

        assert_eq!(library.upload("x", b"one").await.unwrap(), "x.mp3");
        assert_eq!(library.upload("x", b"two").await.unwrap(), "x_1.mp3");
        assert_eq!(library.upload("x.mp3", b"three").await.unwrap(), "x_2.mp3");

        let clips = library.list().await.unwrap();
        assert_eq!(names(&clips), vec!["x.mp3", "x_1.mp3", "x_2.mp3"]);

        // The first upload is untouched by the later ones.
        let first = std::fs::read(library.dir().join("x.mp3")).unwrap();
        assert_eq!(first, b"one");

        let _ = std::fs::remove_dir_all(library.dir());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_uploads_take_distinct_names() {
        let library = scratch_library();

        let uploads = (0..6).map(|i| {
            let library = library.clone();
            tokio::spawn(async move { library.upload("race", format!("take {}", i).as_bytes()).await })
        });
        let mut stored = Vec::new();
        for upload in uploads.collect::<Vec<_>>() {
            stored.push(upload.await.unwrap().unwrap());
        }
        stored.sort();

        assert_eq!(
            stored,
            vec!["race.mp3", "race_1.mp3", "race_2.mp3", "race_3.mp3", "race_4.mp3", "race_5.mp3"]
        );
        assert_eq!(library.list().await.unwrap().len(), 6);

        let _ = std::fs::remove_dir_all(library.dir());
    }

    #[tokio::test]
    async fn find_returns_only_playable_clips() {
        let library = scratch_library();
        let stored = library.upload("ding", b"data").await.unwrap();
        std::fs::write(library.dir().join("notes.txt"), b"t").unwrap();

        let clip = library.find(&stored).await.unwrap();
        assert_eq!(clip.path, library.dir().join("ding.mp3"));
        assert!(matches!(library.find("notes.txt").await, Err(ClipError::NotFound(_))));
        assert!(matches!(library.find("missing.mp3").await, Err(ClipError::NotFound(_))));

        let _ = std::fs::remove_dir_all(library.dir());
    }

    #[tokio::test]
    async fn list_filters_to_audio_and_tolerates_missing_dir() {
        let library = scratch_library();
        assert!(library.list().await.unwrap().is_empty());

        std::fs::create_dir_all(library.dir()).unwrap();
        std::fs::write(library.dir().join("beep.WAV"), b"w").unwrap();
        std::fs::write(library.dir().join("notes.txt"), b"t").unwrap();
        std::fs::write(library.dir().join("alarm.mp3"), b"m").unwrap();

        let clips = library.list().await.unwrap();
        assert_eq!(names(&clips), vec!["alarm.mp3", "beep.WAV"]);

        let _ = std::fs::remove_dir_all(library.dir());
    }

    #[tokio::test]
    async fn delete_removes_and_reports_missing() {
        let library = scratch_library();
        let name = library.upload("gong", b"data").await.unwrap();

        library.delete(&name).await.unwrap();
        assert!(library.list().await.unwrap().is_empty());
        assert!(matches!(
            library.delete(&name).await,
            Err(ClipError::NotFound(_))
        ));

        let _ = std::fs::remove_dir_all(library.dir());
    }

    #[tokio::test]
    async fn rejects_empty_and_hidden_uploads() {
        let library = scratch_library();
        assert!(matches!(library.upload("x", b"").await, Err(ClipError::Empty)));
        assert!(matches!(
            library.upload("../.hidden", b"x").await,
            Err(ClipError::InvalidName(_))
        ));
        assert!(matches!(library.upload("  ", b"x").await, Err(ClipError::InvalidName(_))));
    }

    #[test]
    fn path_components_are_stripped() {
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_name("C:\\music\\ding.wav").unwrap(), "ding.wav");
    }

    #[test]
    fn non_mp3_uploads_get_mp3_suffix() {
        assert_eq!(with_upload_extension("ding"), "ding.mp3");
        assert_eq!(with_upload_extension("ding.MP3"), "ding.MP3");
        assert_eq!(with_upload_extension("ding.wav"), "ding.wav.mp3");
    }
}
