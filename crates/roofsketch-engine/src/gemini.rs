use std::env;

use anyhow::{Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use roofsketch_contracts::credentials::Credential;
use roofsketch_contracts::material::RoofMaterial;
use roofsketch_contracts::payload::GeneratedImage;
use roofsketch_contracts::prompt::sketch_prompt;
use serde_json::{json, Value};

pub const SKETCH_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const API_BASE_ENV: &str = "GEMINI_API_BASE";
pub(crate) const GENERIC_FAILURE: &str = "Failed to generate sketch.";
const DEFAULT_OUTPUT_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("API Key is missing. Please set it in Settings.")]
    MissingCredential,
    #[error("The model did not return an image. Please try again.")]
    NoImageReturned,
    #[error(
        "Model {model} not found. Please ensure your API key has access to the image generation models."
    )]
    ModelUnavailable { model: String },
    #[error("{0}")]
    Failed(String),
}

impl GenerationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::NoImageReturned => "no_image_returned",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::Failed(_) => "failed",
        }
    }
}

/// Non-success HTTP reply from the service. Displays as the service's own message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub status: u16,
    pub message: String,
}

impl ServiceError {
    pub fn from_body(status: u16, body: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|value| value.get("error"))
            .and_then(|error| error.get("message"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                let trimmed = body.trim();
                if trimmed.is_empty() {
                    format!("Gemini request failed ({status})")
                } else {
                    format!("Gemini request failed ({status}): {}", truncate_text(trimmed, 512))
                }
            });
        Self { status, message }
    }
}

#[derive(Debug, Clone)]
pub struct SketchRequest {
    pub credential: Credential,
    pub image_base64: String,
    pub mime_type: String,
    pub material: RoofMaterial,
}

/// One sketch per call, no retries, no caching.
pub trait SketchProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn generate(&self, request: &SketchRequest) -> Result<GeneratedImage, GenerationError>;
}

/// Posts one JSON payload and returns the decoded JSON reply.
pub trait GeminiTransport: Send + Sync {
    fn post_json(&self, endpoint: &str, api_key: &str, payload: &Value) -> Result<Value>;
}

pub struct HttpTransport {
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiTransport for HttpTransport {
    fn post_json(&self, endpoint: &str, api_key: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            // The request URL carries the key; keep it out of error text.
            .map_err(|err| anyhow::Error::new(err.without_url()))
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| anyhow::Error::new(err.without_url()))
        .context("Gemini response body read failed")?;
    if !status.is_success() {
        return Err(ServiceError::from_body(status.as_u16(), &body).into());
    }
    serde_json::from_str(&body).context("Gemini returned invalid JSON payload")
}

pub struct GeminiSketchProvider<T = HttpTransport> {
    api_base: String,
    model: String,
    transport: T,
}

impl GeminiSketchProvider<HttpTransport> {
    pub fn new() -> Self {
        let api_base = env::var(API_BASE_ENV)
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::with_transport(api_base, HttpTransport::new())
    }
}

impl Default for GeminiSketchProvider<HttpTransport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: GeminiTransport> GeminiSketchProvider<T> {
    pub fn with_transport(api_base: impl Into<String>, transport: T) -> Self {
        Self {
            api_base: api_base.into(),
            model: SKETCH_MODEL.to_string(),
            transport,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    pub fn build_payload(request: &SketchRequest) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": request.mime_type,
                            "data": request.image_base64,
                        }
                    },
                    { "text": sketch_prompt(request.material) },
                ],
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
            },
        })
    }
}

impl<T: GeminiTransport> SketchProvider for GeminiSketchProvider<T> {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate(&self, request: &SketchRequest) -> Result<GeneratedImage, GenerationError> {
        if !request.credential.is_present() {
            return Err(GenerationError::MissingCredential);
        }
        let payload = Self::build_payload(request);
        let response = self
            .transport
            .post_json(&self.endpoint(), request.credential.expose(), &payload)
            .map_err(|err| classify_failure(&self.model, &err))?;
        extract_inline_image(&response)
    }
}

/// First part of the first candidate that carries inline image data.
pub fn extract_inline_image(response: &Value) -> Result<GeneratedImage, GenerationError> {
    let parts = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .ok_or(GenerationError::NoImageReturned)?;

    parts
        .iter()
        .filter_map(|part| {
            part.get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
        })
        .find_map(|inline| {
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .filter(|data| !data.is_empty())?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .filter(|mime| !mime.trim().is_empty())
                .unwrap_or(DEFAULT_OUTPUT_MIME);
            Some(GeneratedImage {
                data: data.to_string(),
                mime_type: mime_type.to_string(),
            })
        })
        .ok_or(GenerationError::NoImageReturned)
}

/// Maps a transport or service failure onto the user-facing error.
pub fn classify_failure(model: &str, err: &anyhow::Error) -> GenerationError {
    let service = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ServiceError>());
    // Context layers name the endpoint, so only the service reply or the root
    // cause can say "not found".
    let not_found = match service {
        Some(svc) => svc.status == 404 || mentions_not_found(&svc.message),
        None => mentions_not_found(&err.root_cause().to_string()),
    };
    if not_found {
        return GenerationError::ModelUnavailable {
            model: model.to_string(),
        };
    }
    let message = service
        .map(|svc| svc.message.trim().to_string())
        .unwrap_or_else(|| error_chain_text(err, 512));
    if message.trim().is_empty() {
        return GenerationError::Failed(GENERIC_FAILURE.to_string());
    }
    GenerationError::Failed(message)
}

fn mentions_not_found(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    lowered.contains("404") || lowered.contains("not found") || lowered.contains("not_found")
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use roofsketch_contracts::credentials::{Credential, CredentialSource};
    use roofsketch_contracts::material::RoofMaterial;
    use roofsketch_contracts::prompt::sketch_prompt;
    use serde_json::{json, Value};

    use super::{
        classify_failure, extract_inline_image, GeminiSketchProvider, GeminiTransport,
        GenerationError, ServiceError, SketchProvider, SketchRequest, SKETCH_MODEL,
    };

    const PNG_PAYLOAD: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    enum Reply {
        Json(Value),
        Service(u16, &'static str),
        Transport(&'static str),
    }

    struct MockTransport {
        reply: Reply,
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl MockTransport {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
        }
    }

    impl GeminiTransport for MockTransport {
        fn post_json(
            &self,
            endpoint: &str,
            api_key: &str,
            payload: &Value,
        ) -> anyhow::Result<Value> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((endpoint.to_string(), api_key.to_string(), payload.clone()));
            }
            match &self.reply {
                Reply::Json(value) => Ok(value.clone()),
                Reply::Service(status, body) => Err(ServiceError::from_body(*status, body).into()),
                Reply::Transport(message) => Err(anyhow!(*message)),
            }
        }
    }

    fn request(key: &str) -> SketchRequest {
        SketchRequest {
            credential: Credential::new(key, CredentialSource::Store),
            image_base64: "cm9vZg==".to_string(),
            mime_type: "image/jpeg".to_string(),
            material: RoofMaterial::MetalStandingSeam,
        }
    }

    fn image_reply(data: &str, mime: &str) -> Value {
        json!({
            "candidates": [{
                "content": {"parts": [{"inlineData": {"mimeType": mime, "data": data}}]}
            }]
        })
    }

    fn provider(reply: Reply) -> GeminiSketchProvider<MockTransport> {
        GeminiSketchProvider::with_transport(
            "https://example.test/v1beta",
            MockTransport::new(reply),
        )
    }

    #[test]
    fn echoed_payload_is_returned_byte_for_byte() {
        let provider = provider(Reply::Json(image_reply(PNG_PAYLOAD, "image/png")));
        let image = provider.generate(&request("key-1")).unwrap();
        assert_eq!(image.data, PNG_PAYLOAD);
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data_url(), format!("data:image/png;base64,{PNG_PAYLOAD}"));
    }

    #[test]
    fn request_carries_image_prompt_and_image_modality() {
        let provider = provider(Reply::Json(image_reply(PNG_PAYLOAD, "image/png")));
        provider.generate(&request("key-1")).unwrap();

        let calls = provider.transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (endpoint, key, payload) = &calls[0];
        assert_eq!(
            endpoint,
            &format!("https://example.test/v1beta/models/{SKETCH_MODEL}:generateContent")
        );
        assert_eq!(key, "key-1");

        let parts = &payload["contents"][0]["parts"];
        assert_eq!(
            parts[0],
            json!({"inlineData": {"mimeType": "image/jpeg", "data": "cm9vZg=="}})
        );
        assert_eq!(
            parts[1]["text"],
            json!(sketch_prompt(RoofMaterial::MetalStandingSeam))
        );
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn empty_credential_fails_without_network() {
        let provider = provider(Reply::Json(image_reply(PNG_PAYLOAD, "image/png")));
        let err = provider.generate(&request("")).err();
        assert_eq!(err, Some(GenerationError::MissingCredential));
        assert_eq!(provider.transport.call_count(), 0);
    }

    #[test]
    fn extraction_skips_text_parts_and_defaults_mime() {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your sketch"},
                    {"inlineData": {"data": ""}},
                    {"inline_data": {"data": "QUJD"}},
                    {"inlineData": {"mimeType": "image/webp", "data": "REVG"}}
                ]}
            }]
        });
        let image = extract_inline_image(&response).unwrap();
        assert_eq!(image.data, "QUJD");
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn missing_image_shapes_are_no_image_returned() {
        for response in [
            json!({}),
            json!({"candidates": []}),
            json!({"candidates": [{}]}),
            json!({"candidates": [{"content": {}}]}),
            json!({"candidates": [{"content": {"parts": [{"text": "sorry"}]}}]}),
            json!({"candidates": [
                {"finishReason": "SAFETY"},
                {"content": {"parts": [{"inlineData": {"data": "QUJD"}}]}}
            ]}),
        ] {
            assert_eq!(
                extract_inline_image(&response).err(),
                Some(GenerationError::NoImageReturned)
            );
        }
        assert_eq!(
            GenerationError::NoImageReturned.to_string(),
            "The model did not return an image. Please try again."
        );
    }

    #[test]
    fn not_found_service_error_mentions_model_access() {
        let provider = provider(Reply::Service(
            404,
            r#"{"error": {"code": 404, "message": "models/x is not found for API version v1beta", "status": "NOT_FOUND"}}"#,
        ));
        let err = provider.generate(&request("key-1")).err().unwrap();
        assert_eq!(
            err,
            GenerationError::ModelUnavailable {
                model: SKETCH_MODEL.to_string()
            }
        );
        let message = err.to_string();
        assert!(message.contains(SKETCH_MODEL));
        assert!(message.contains("API key has access"));
        assert!(!message.contains("v1beta"));
    }

    #[test]
    fn not_found_text_from_transport_is_rewritten() {
        let err = classify_failure(SKETCH_MODEL, &anyhow!("upstream said: resource not found"));
        assert_eq!(err.kind(), "model_unavailable");
        let err = classify_failure(SKETCH_MODEL, &anyhow!("HTTP 404"));
        assert_eq!(err.kind(), "model_unavailable");
    }

    #[test]
    fn other_failures_pass_the_service_message_through() {
        let rejecting = provider(Reply::Service(
            400,
            r#"{"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT"}}"#,
        ));
        let err = rejecting.generate(&request("key-1")).err().unwrap();
        assert_eq!(err, GenerationError::Failed("API key not valid.".to_string()));

        let offline = provider(Reply::Transport("connection reset"));
        let err = offline.generate(&request("key-1")).err().unwrap();
        assert_eq!(err, GenerationError::Failed("connection reset".to_string()));
    }

    #[test]
    fn endpoint_in_context_does_not_look_like_not_found() {
        let err = anyhow!("connection refused")
            .context("Gemini request failed (http://localhost:4040/v1beta/models/x:generateContent)");
        let classified = classify_failure(SKETCH_MODEL, &err);
        assert_eq!(classified.kind(), "failed");
        assert!(classified.to_string().contains("connection refused"));

        let err =
            anyhow!("404 page not found").context("Gemini request failed (http://localhost:4040)");
        assert_eq!(classify_failure(SKETCH_MODEL, &err).kind(), "model_unavailable");
    }

    #[test]
    fn blank_failure_uses_static_fallback() {
        let err = classify_failure(SKETCH_MODEL, &anyhow!("   "));
        assert_eq!(err, GenerationError::Failed("Failed to generate sketch.".to_string()));
    }

    #[test]
    fn service_error_without_json_keeps_status() {
        let err = ServiceError::from_body(503, "");
        assert_eq!(err.message, "Gemini request failed (503)");
        let err = ServiceError::from_body(500, "<html>oops</html>");
        assert_eq!(err.message, "Gemini request failed (500): <html>oops</html>");
    }
}
