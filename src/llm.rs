//! Cliente de generación sobre la API REST de Gemini (`generateContent`).
//!
//! Una única llamada por generación: sin reintentos, sin streaming y sin
//! caché. La temperatura es fija y baja para favorecer un texto factual.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    config::AppConfig,
    error::{AppError, AppResult},
    models::{ComposedRequest, ContentPart},
};

pub const TEMPERATURE: f64 = 0.2;
pub const EMPTY_RESPONSE_FALLBACK: &str = "No response generated.";
const GENERIC_FAILURE: &str = "Failed to generate discharge letter.";

// --- Estructuras del protocolo de Gemini ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: WireContent<'a>,
    contents: Vec<WireContent<'a>>,
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob<'a>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
struct WireGenerationConfig {
    temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

fn to_wire_part(part: &ContentPart) -> WirePart<'_> {
    match part {
        ContentPart::Text(text) => WirePart::Text { text },
        ContentPart::Binary { mime_type, data } => WirePart::InlineData {
            inline_data: WireBlob { mime_type, data },
        },
    }
}

/// Cuerpo JSON de la petición para una petición compuesta.
pub fn build_request_body(request: &ComposedRequest) -> serde_json::Value {
    let body = GenerateContentRequest {
        system_instruction: WireContent {
            role: None,
            parts: vec![WirePart::Text {
                text: &request.system_instruction,
            }],
        },
        contents: vec![WireContent {
            role: Some("user"),
            parts: request.parts.iter().map(to_wire_part).collect(),
        }],
        generation_config: WireGenerationConfig {
            temperature: TEMPERATURE,
        },
    };
    serde_json::to_value(body).unwrap_or_default()
}

/// Texto de la respuesta: concatenación de las partes del primer candidato,
/// o el texto de reserva si no hay nada.
pub fn response_text(response: GenerateContentResponse) -> String {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        EMPTY_RESPONSE_FALLBACK.to_string()
    } else {
        text
    }
}

/// Mensaje de error de una respuesta no exitosa: el `error.message` de
/// Gemini si viene, o el cuerpo en bruto.
pub fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if message.is_empty() {
        format!("{GENERIC_FAILURE} (HTTP {status})")
    } else {
        message
    }
}

/// Gestor de la llamada al modelo.
#[derive(Debug, Clone)]
pub struct LlmManager {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: url::Url,
    pub model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let endpoint = cfg
            .api_base
            .join(&format!("v1beta/models/{}:generateContent", cfg.model))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_key: cfg.api_key.clone(),
            endpoint,
            model: cfg.model.clone(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Envía la petición compuesta y devuelve el texto del modelo tal cual.
    pub async fn generate(&self, request: &ComposedRequest) -> AppResult<String> {
        let api_key = self.api_key.as_deref().ok_or(AppError::Configuration)?;

        let body = build_request_body(request);
        debug!(
            "Enviando {} segmentos a {} (modelo {})",
            request.parts.len(),
            self.endpoint,
            self.model
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Error de red llamando a Gemini: {}", e);
                AppError::Generation(e.to_string())
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::Generation(e.to_string()))?;

        if !status.is_success() {
            let message = error_message(status, &raw);
            error!("Gemini respondió {}: {}", status, message);
            return Err(AppError::Generation(message));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&raw).map_err(|e| {
            error!("Respuesta de Gemini no válida: {}", e);
            AppError::Generation(format!("{GENERIC_FAILURE} ({e})"))
        })?;

        let text = response_text(parsed);
        info!("Informe generado ({} caracteres).", text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> ComposedRequest {
        ComposedRequest {
            system_instruction: "SYSTEM".into(),
            parts: vec![
                ContentPart::Text("prompt".into()),
                ContentPart::Binary {
                    mime_type: "application/pdf".into(),
                    data: "JVBERi0=".into(),
                },
            ],
        }
    }

    #[test]
    fn request_body_matches_wire_contract() {
        let body = build_request_body(&sample_request());

        assert_eq!(
            body,
            json!({
                "systemInstruction": { "parts": [{ "text": "SYSTEM" }] },
                "contents": [{
                    "role": "user",
                    "parts": [
                        { "text": "prompt" },
                        { "inlineData": { "mimeType": "application/pdf", "data": "JVBERi0=" } }
                    ]
                }],
                "generationConfig": { "temperature": 0.2 }
            })
        );
        let wire = serde_json::to_string(&body).unwrap();
        assert!(wire.contains(r#""generationConfig":{"temperature":0.2}"#), "{wire}");
    }

    #[test]
    fn response_parts_are_concatenated() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "role": "model", "parts": [
                { "text": "Sehr geehrte " }, { "text": "Kollegen," }
            ]}}]
        }))
        .unwrap();
        assert_eq!(response_text(response), "Sehr geehrte Kollegen,");
    }

    #[test]
    fn empty_response_falls_back() {
        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap();
        assert_eq!(response_text(blocked), EMPTY_RESPONSE_FALLBACK);

        let no_text: GenerateContentResponse =
            serde_json::from_value(json!({ "candidates": [{ "finishReason": "STOP" }] })).unwrap();
        assert_eq!(response_text(no_text), EMPTY_RESPONSE_FALLBACK);
    }

    #[test]
    fn whitespace_response_is_returned_verbatim() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{ "content": { "parts": [{ "text": "  \n" }] } }]
        }))
        .unwrap();
        assert_eq!(response_text(response), "  \n");
    }

    #[test]
    fn remote_error_message_is_extracted() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted (e.g. check quota).","status":"RESOURCE_EXHAUSTED"}}"#;
        assert_eq!(
            error_message(reqwest::StatusCode::TOO_MANY_REQUESTS, body),
            "Resource has been exhausted (e.g. check quota)."
        );
        assert_eq!(
            error_message(reqwest::StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert!(error_message(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "")
            .contains("HTTP 500"));
    }

    #[test]
    fn endpoint_is_built_from_base_and_model() {
        let cfg = AppConfig {
            model: "gemini-test".into(),
            ..AppConfig::default()
        };
        let llm = LlmManager::from_config(&cfg).unwrap();
        assert_eq!(
            llm.endpoint().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-test:generateContent"
        );
    }

    #[tokio::test]
    async fn missing_credential_fails_before_network() {
        // Puerto cerrado: si se llegara a la red el error sería de generación.
        let cfg = AppConfig {
            api_key: None,
            api_base: url::Url::parse("http://127.0.0.1:9/").unwrap(),
            ..AppConfig::default()
        };
        let llm = LlmManager::from_config(&cfg).unwrap();

        let err = llm.generate(&sample_request()).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration));
    }

    #[tokio::test]
    async fn transport_failure_is_a_generation_error() {
        let cfg = AppConfig {
            api_key: Some("key".into()),
            api_base: url::Url::parse("http://127.0.0.1:9/").unwrap(),
            request_timeout_secs: 5,
            ..AppConfig::default()
        };
        let llm = LlmManager::from_config(&cfg).unwrap();

        let err = llm.generate(&sample_request()).await.unwrap_err();
        assert!(matches!(err, AppError::Generation(_)));
    }
}
