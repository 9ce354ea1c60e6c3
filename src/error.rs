//! Taxonomía de errores de la aplicación y su conversión a respuestas HTTP.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::models::AttachmentCategory;

#[derive(Debug, Error)]
pub enum AppError {
    /// Falta la credencial del modelo. Se corrige en la configuración.
    #[error("API Key is missing. Configure GEMINI_API_KEY and try again.")]
    Configuration,

    /// Fallo leyendo un documento Word. Nunca llega al usuario como error:
    /// el normalizador lo sustituye por un aviso en el prompt.
    #[error("No se pudo extraer el texto de {file_name}: {reason}")]
    AttachmentExtraction { file_name: String, reason: String },

    /// Cualquier fallo de la llamada remota; el mensaje se muestra tal cual.
    #[error("{0}")]
    Generation(String),

    #[error("Tipo de fichero no admitido para {category}: {mime_type}")]
    AttachmentRejected {
        category: AttachmentCategory,
        mime_type: String,
    },

    #[error("El fichero {0} está vacío.")]
    EmptyFile(String),

    #[error("Ya hay una generación en curso. Espere a que termine.")]
    Busy,

    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration => StatusCode::SERVICE_UNAVAILABLE,
            Self::AttachmentExtraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::AttachmentRejected { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::EmptyFile(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Busy => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
