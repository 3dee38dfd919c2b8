//! JSON client for speech-to-text and text-to-speech.
//!
//! Audio travels base64 encoded in both directions.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use sarathi_core::error::{Result, SarathiError};
use sarathi_core::types::{AudioClip, SpeechRequest, Transcription};

use crate::client::HttpBackend;
use crate::services::VoiceService;

#[derive(Serialize)]
struct TranscribeBody<'a> {
    audio: String,
    mime_type: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    audio: String,
    #[serde(default = "default_mime")]
    mime_type: String,
}

fn default_mime() -> String {
    "audio/mpeg".to_string()
}

/// [`VoiceService`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpVoiceService {
    backend: HttpBackend,
}

impl HttpVoiceService {
    pub fn new(backend: HttpBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl VoiceService for HttpVoiceService {
    async fn transcribe(
        &self,
        audio: AudioClip,
        language: &str,
        user_id: Option<&str>,
    ) -> Result<Transcription> {
        let body = TranscribeBody {
            audio: STANDARD.encode(&audio.bytes),
            mime_type: &audio.mime_type,
            language,
            user_id,
        };
        let request = self.backend.post("/api/voice/transcribe").json(&body);
        let result: Transcription = self.backend.send_json(request).await?;
        tracing::debug!(
            text_len = result.text.len(),
            language = ?result.language,
            "Audio transcribed"
        );
        Ok(result)
    }

    async fn synthesize(&self, request: SpeechRequest) -> Result<AudioClip> {
        let http = self.backend.post("/api/voice/synthesize").json(&request);
        let response: SynthesizeResponse = self.backend.send_json(http).await?;
        let bytes = STANDARD
            .decode(response.audio.as_bytes())
            .map_err(|e| SarathiError::Serialization(format!("Invalid audio payload: {}", e)))?;
        Ok(AudioClip::new(bytes, response.mime_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> HttpVoiceService {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let backend = HttpBackend::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        HttpVoiceService::new(backend)
    }

    #[tokio::test]
    async fn test_transcribe_sends_base64_audio() {
        let router = Router::new().route(
            "/api/voice/transcribe",
            post(|Json(body): Json<Value>| async move {
                let audio = STANDARD.decode(body["audio"].as_str().unwrap()).unwrap();
                assert_eq!(audio, vec![1u8, 2, 3]);
                assert_eq!(body["language"], "auto");
                assert!(body.get("user_id").is_none());
                Json(json!({ "text": "what is karma", "language": "en" }))
            }),
        );
        let service = serve(router).await;

        let result = service
            .transcribe(AudioClip::new(vec![1, 2, 3], "audio/m4a"), "auto", None)
            .await
            .unwrap();
        assert_eq!(result.text, "what is karma");
        assert_eq!(result.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn test_synthesize_decodes_audio() {
        let router = Router::new().route(
            "/api/voice/synthesize",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["voice"], "default");
                Json(json!({ "audio": STANDARD.encode([9u8, 8, 7]) }))
            }),
        );
        let service = serve(router).await;

        let clip = service
            .synthesize(SpeechRequest {
                text: "Dharma is duty.".into(),
                language: "en".into(),
                voice: "default".into(),
                speed: 1.0,
            })
            .await
            .unwrap();
        assert_eq!(clip.bytes, vec![9, 8, 7]);
        assert_eq!(clip.mime_type, "audio/mpeg");
    }

    #[tokio::test]
    async fn test_synthesize_rejects_bad_base64() {
        let router = Router::new().route(
            "/api/voice/synthesize",
            post(|| async { Json(json!({ "audio": "***" })) }),
        );
        let service = serve(router).await;
        let err = service
            .synthesize(SpeechRequest {
                text: "x".into(),
                language: "en".into(),
                voice: "default".into(),
                speed: 1.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SarathiError::Serialization(_)));
    }
}
