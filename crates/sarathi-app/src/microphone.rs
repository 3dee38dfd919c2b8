//! Terminal stand-in for a microphone.
//!
//! A terminal has no capture device, so a prerecorded audio file plays the
//! part: "recording" starts when asked and the file's bytes are the audio
//! handed back on stop. Without a file, permission is refused.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use sarathi_chat::{Microphone, Recording};
use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::AudioClip;

#[derive(Debug, Clone)]
pub struct FileMicrophone {
    source: Option<PathBuf>,
}

impl FileMicrophone {
    pub fn new(source: Option<PathBuf>) -> Self {
        Self { source }
    }
}

/// MIME type guessed from the file extension.
pub fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/m4a",
        Some("ogg") => "audio/ogg",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

/// File extension for saving synthesized speech of the given MIME type.
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        "audio/m4a" | "audio/mp4" => "m4a",
        _ => "mp3",
    }
}

#[async_trait]
impl Microphone for FileMicrophone {
    async fn request_permission(&self) -> Result<bool> {
        Ok(self.source.is_some())
    }

    async fn set_recording_mode(&self, enabled: bool) -> Result<()> {
        tracing::debug!(enabled, "Recording mode");
        Ok(())
    }

    async fn start(&self) -> Result<Box<dyn Recording>> {
        let path = self
            .source
            .clone()
            .ok_or_else(|| SarathiError::Recording("No audio source configured".to_string()))?;
        Ok(Box::new(FileRecording {
            path,
            released: false,
        }))
    }
}

struct FileRecording {
    path: PathBuf,
    released: bool,
}

#[async_trait]
impl Recording for FileRecording {
    async fn finish(&mut self) -> Result<AudioClip> {
        let bytes = tokio::fs::read(&self.path).await.map_err(|e| {
            SarathiError::Recording(format!("{}: {}", self.path.display(), e))
        })?;
        Ok(AudioClip::new(bytes, mime_for(&self.path)))
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            tracing::debug!(path = %self.path.display(), "Audio source released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.WAV")), "audio/wav");
        assert_eq!(mime_for(Path::new("a.mp3")), "audio/mpeg");
        assert_eq!(mime_for(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("audio/wav"), "wav");
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("application/octet-stream"), "mp3");
    }

    #[tokio::test]
    async fn test_without_source_permission_is_refused() {
        let mic = FileMicrophone::new(None);
        assert!(!mic.request_permission().await.unwrap());
        assert!(mic.start().await.is_err());
    }

    #[tokio::test]
    async fn test_recording_reads_file() {
        let mut file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();

        let mic = FileMicrophone::new(Some(file.path().to_path_buf()));
        assert!(mic.request_permission().await.unwrap());
        let mut recording = mic.start().await.unwrap();
        let clip = recording.finish().await.unwrap();
        recording.release();
        recording.release();

        assert_eq!(clip.bytes, vec![1, 2, 3]);
        assert_eq!(clip.mime_type, "audio/wav");
    }
}
