use axum::{
    extract::{DefaultBodyLimit, Json, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    attachments,
    error::{AppError, AppResult},
    letter,
    models::{
        Audience, AttachmentCategory, AttachmentInfo, ClinicalRecord, ContentPart,
        GenerationConfig, Language, PatientRecord, SUGGESTED_POSITIONS,
    },
    session::SessionView,
};

// --- Payloads y Respuestas de la API ---

/// Estado del formulario enviado junto con la petición de generación. Los
/// apartados presentes sustituyen a los de la sesión antes de tomar la
/// instantánea.
#[derive(Deserialize, Default)]
pub struct GenerateRequest {
    #[serde(default)]
    patient: Option<PatientRecord>,
    #[serde(default)]
    clinical: Option<ClinicalRecord>,
    #[serde(default)]
    config: Option<GenerationConfig>,
}

#[derive(Serialize)]
pub struct GenerateResponse {
    letter: String,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PreviewPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    Binary { mime_type: String, base64_len: usize },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPreview {
    system_instruction: String,
    parts: Vec<PreviewPart>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryOption {
    value: AttachmentCategory,
    label: &'static str,
    accept: &'static str,
}

#[derive(Serialize)]
pub struct ChoiceOption<T> {
    value: T,
    label: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormOptions {
    categories: Vec<CategoryOption>,
    positions: &'static [&'static str],
    languages: Vec<ChoiceOption<Language>>,
    audiences: Vec<ChoiceOption<Audience>>,
    has_api_key: bool,
    model: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    let max_upload_bytes = app_state.config.max_upload_bytes;

    Router::new()
        .route("/api/session", get(session_handler))
        .route("/api/session/patient", put(update_patient_handler))
        .route("/api/session/clinical", put(update_clinical_handler))
        .route("/api/session/config", put(update_config_handler))
        .route("/api/session/reset", post(reset_handler))
        .route("/api/options", get(options_handler))
        .route(
            "/api/attachments/:category",
            post(upload_attachment_handler).delete(remove_attachment_handler),
        )
        .route("/api/prompt-preview", get(prompt_preview_handler))
        .route("/api/generate", post(generate_handler))
        .route("/api/status", get(status_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(app_state)
}

fn parse_category(raw: &str) -> AppResult<AttachmentCategory> {
    AttachmentCategory::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("Categoría de adjunto desconocida: {raw}")))
}

// --- Handlers del formulario ---

#[axum::debug_handler]
async fn session_handler(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.session.lock().unwrap().view())
}

#[axum::debug_handler]
async fn update_patient_handler(
    State(state): State<AppState>,
    Json(patient): Json<PatientRecord>,
) -> Json<SessionView> {
    let mut session = state.session.lock().unwrap();
    session.update_patient(patient);
    Json(session.view())
}

#[axum::debug_handler]
async fn update_clinical_handler(
    State(state): State<AppState>,
    Json(clinical): Json<ClinicalRecord>,
) -> Json<SessionView> {
    let mut session = state.session.lock().unwrap();
    session.update_clinical(clinical);
    Json(session.view())
}

#[axum::debug_handler]
async fn update_config_handler(
    State(state): State<AppState>,
    Json(config): Json<GenerationConfig>,
) -> Json<SessionView> {
    let mut session = state.session.lock().unwrap();
    session.update_config(config);
    Json(session.view())
}

#[axum::debug_handler]
async fn reset_handler(State(state): State<AppState>) -> Json<SessionView> {
    let mut session = state.session.lock().unwrap();
    session.reset();
    info!("Formulario reiniciado para un nuevo informe.");
    Json(session.view())
}

#[axum::debug_handler]
async fn options_handler(State(state): State<AppState>) -> Json<FormOptions> {
    let categories = AttachmentCategory::all()
        .iter()
        .map(|&category| CategoryOption {
            value: category,
            label: category.label(),
            accept: attachments::accept_attribute(category),
        })
        .collect();

    Json(FormOptions {
        categories,
        positions: SUGGESTED_POSITIONS,
        languages: vec![
            ChoiceOption { value: Language::De, label: "Deutsch" },
            ChoiceOption { value: Language::En, label: "English" },
        ],
        audiences: vec![
            ChoiceOption { value: Audience::Doctor, label: "Medical Professional (Formal)" },
            ChoiceOption { value: Audience::Patient, label: "Patient (Plain Language)" },
        ],
        has_api_key: state.llm_manager.has_credentials(),
        model: state.llm_manager.model.clone(),
    })
}

// --- Handlers de adjuntos ---

#[axum::debug_handler]
async fn upload_attachment_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
    mut multipart: Multipart,
) -> AppResult<Json<AttachmentInfo>> {
    let category = parse_category(&category)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let attachment =
            attachments::build_attachment(category, &file_name, content_type.as_deref(), &bytes)?;
        let info = AttachmentInfo::from(&attachment);

        let replaced = state.session.lock().unwrap().put_attachment(attachment);
        match replaced {
            Some(old) => info!(
                "Adjunto {} sustituye a {} en '{}'.",
                info.file_name, old.file_name, category
            ),
            None => info!("Adjunto {} guardado en '{}'.", info.file_name, category),
        }
        return Ok(Json(info));
    }

    Err(AppError::BadRequest(
        "La petición no contiene el campo 'file'.".to_string(),
    ))
}

#[axum::debug_handler]
async fn remove_attachment_handler(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> AppResult<StatusCode> {
    let category = parse_category(&category)?;
    match state.session.lock().unwrap().remove_attachment(category) {
        Some(old) => {
            info!("Adjunto {} eliminado de '{}'.", old.file_name, category);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Ok(StatusCode::NOT_FOUND),
    }
}

// --- Handlers de generación ---

#[axum::debug_handler]
async fn prompt_preview_handler(State(state): State<AppState>) -> Json<PromptPreview> {
    let snapshot = state.session.lock().unwrap().clone();
    let request = letter::compose(&snapshot).await;

    let parts = request
        .parts
        .into_iter()
        .map(|part| match part {
            ContentPart::Text(text) => PreviewPart::Text { text },
            ContentPart::Binary { mime_type, data } => PreviewPart::Binary {
                mime_type,
                base64_len: data.len(),
            },
        })
        .collect();

    Json(PromptPreview {
        system_instruction: request.system_instruction,
        parts,
    })
}

#[axum::debug_handler]
async fn generate_handler(
    State(state): State<AppState>,
    form: Option<Json<GenerateRequest>>,
) -> AppResult<Json<GenerateResponse>> {
    if let Some(Json(form)) = form {
        let mut session = state.session.lock().unwrap();
        if let Some(patient) = form.patient {
            session.update_patient(patient);
        }
        if let Some(clinical) = form.clinical {
            session.update_clinical(clinical);
        }
        if let Some(config) = form.config {
            session.update_config(config);
        }
    }

    {
        let mut status = state.status.lock().unwrap();
        if status.is_busy {
            return Err(AppError::Busy);
        }
        status.is_busy = true;
        status.last_error = None;
        status.message = "Generando informe...".to_string();
    }

    let snapshot = state.session.lock().unwrap().clone();
    let llm = state.llm_manager.clone();
    let status_arc = state.status.clone();
    let span = info_span!("generate", request_id = %Uuid::new_v4());

    // La tarea sigue aunque el cliente corte la conexión, de modo que
    // `is_busy` siempre se libera al terminar la llamada.
    let task = tokio::spawn(
        async move {
            let result = letter::generate_letter(&llm, &snapshot).await;

            let mut status = status_arc.lock().unwrap();
            status.is_busy = false;
            match &result {
                Ok(text) => {
                    status.message = "¡Informe generado!".to_string();
                    status.last_letter = Some(text.clone());
                    status.last_generated_at = Some(Utc::now());
                }
                Err(err) => {
                    status.message = "Error generando el informe.".to_string();
                    status.last_error = Some(err.to_string());
                    error!("Error de generación: {}", err);
                }
            }
            result
        }
        .instrument(span),
    );

    let letter = task.await.map_err(|e| {
        error!("La tarea de generación terminó de forma inesperada: {}", e);
        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.last_error = Some(e.to_string());
        AppError::Generation(e.to_string())
    })??;

    Ok(Json(GenerateResponse { letter }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    (StatusCode::OK, Json(json!({ "message": "Servidor apagándose." })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, llm::LlmManager};
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "----dischargeletterboundary";

    fn test_state(api_key: Option<&str>) -> AppState {
        let config = AppConfig {
            api_key: api_key.map(str::to_string),
            api_base: url::Url::parse("http://127.0.0.1:9/").unwrap(),
            request_timeout_secs: 5,
            ..AppConfig::default()
        };
        let llm = LlmManager::from_config(&config).unwrap();
        AppState::new(config, llm, None)
    }

    fn multipart_body(file_name: &str, mime: &str, content: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload(category: &str, file_name: &str, mime: &str, content: &[u8]) -> Request<Body> {
        Request::post(format!("/api/attachments/{category}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(file_name, mime, content)))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, value: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn form_edits_are_reflected_in_session() {
        let app = create_router(test_state(None));

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/session/patient",
                json!({ "firstName": "Anna", "lastName": "Muster", "dob": "1980-01-01" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/session").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["patient"]["firstName"], "Anna");
        assert_eq!(json["patient"]["dateOfBirth"], "1980-01-01");
        assert_eq!(json["config"]["targetLanguage"], "de");
    }

    #[tokio::test]
    async fn uploading_twice_keeps_one_attachment_per_category() {
        let state = test_state(None);
        let app = create_router(state.clone());

        for name in ["erster.pdf", "zweiter.pdf"] {
            let response = app
                .clone()
                .oneshot(upload("lab", name, "application/pdf", b"%PDF-1.4"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let stored = state.session.lock().unwrap().attachments();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].file_name, "zweiter.pdf");
    }

    #[tokio::test]
    async fn pdf_is_rejected_for_image_only_category() {
        let app = create_router(test_state(None));
        let response = app
            .oneshot(upload("preop", "scan.pdf", "application/pdf", b"%PDF-1.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn unknown_category_is_bad_request() {
        let app = create_router(test_state(None));
        let response = app
            .oneshot(upload("xray", "scan.png", "image/png", b"\x89PNG"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn removing_attachment_clears_slot() {
        let state = test_state(None);
        let app = create_router(state.clone());
        app.clone()
            .oneshot(upload("postop", "post.png", "image/png", b"\x89PNG"))
            .await
            .unwrap();

        let delete = || Request::delete("/api/attachments/postop").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn preview_shows_prompt_and_attachment_segments() {
        let app = create_router(test_state(None));
        app.clone()
            .oneshot(upload("opreport", "op.pdf", "application/pdf", b"%PDF-1.4"))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::get("/api/prompt-preview").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;

        assert!(json["systemInstruction"]
            .as_str()
            .unwrap()
            .contains("OUTPUT LANGUAGE: GERMAN (Deutsch)"));
        let parts = json["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], "text");
        assert!(parts[1]["text"].as_str().unwrap().contains("OPREPORT"));
        assert_eq!(parts[2]["type"], "binary");
        assert_eq!(parts[2]["mimeType"], "application/pdf");
    }

    #[tokio::test]
    async fn generate_without_key_reports_configuration_error() {
        let state = test_state(None);
        let app = create_router(state.clone());

        let response = app
            .oneshot(Request::post("/api/generate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert!(json["error"].as_str().unwrap().contains("API Key is missing"));

        let status = state.status.lock().unwrap().clone();
        assert!(!status.is_busy);
        assert!(status.last_error.unwrap().contains("API Key is missing"));
    }

    #[tokio::test]
    async fn generate_uses_form_sent_with_the_request() {
        let state = test_state(None);
        let app = create_router(state.clone());

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/generate",
                json!({
                    "patient": { "firstName": "Anna", "lastName": "Muster" },
                    "clinical": { "diagnosis": "Appendizitis" },
                    "config": { "targetLanguage": "en", "doctorName": "Dr. Weber" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let session = state.session.lock().unwrap().clone();
        assert_eq!(session.patient.first_name, "Anna");
        assert_eq!(session.clinical.diagnosis, "Appendizitis");
        assert_eq!(session.config.target_language, Language::En);
        assert_eq!(session.config.doctor_name, "Dr. Weber");
    }

    #[tokio::test]
    async fn unreachable_model_reports_generation_error() {
        let state = test_state(Some("key"));
        let app = create_router(state.clone());

        let response = app
            .oneshot(Request::post("/api/generate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(!state.status.lock().unwrap().is_busy);
    }

    #[tokio::test]
    async fn second_generation_while_busy_is_refused() {
        let state = test_state(Some("key"));
        state.status.lock().unwrap().is_busy = true;
        let app = create_router(state);

        let response = app
            .oneshot(Request::post("/api/generate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn new_attempt_clears_previous_error() {
        let state = test_state(None);
        state.status.lock().unwrap().last_error = Some("viejo".into());
        let app = create_router(state.clone());

        app.oneshot(Request::post("/api/generate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let last_error = state.status.lock().unwrap().last_error.clone().unwrap();
        assert_ne!(last_error, "viejo");
    }

    #[tokio::test]
    async fn options_list_every_category() {
        let app = create_router(test_state(None));
        let response = app
            .oneshot(Request::get("/api/options").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;

        assert_eq!(json["categories"].as_array().unwrap().len(), 7);
        assert_eq!(json["hasApiKey"], false);
        assert_eq!(json["positions"][2], "Senior Physician");
        assert_eq!(json["categories"][5]["accept"], "image/*");
    }
}
