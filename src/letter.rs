//! Generación del informe de alta a partir de una instantánea del formulario.
//!
//! Flujo:
//!   1. Normalizar los adjuntos (texto de Word, binarios para imágenes y PDF).
//!   2. Componer la instrucción de sistema y el prompt estructurado.
//!   3. Una única llamada al modelo.

use tracing::info;

use crate::{
    attachments,
    error::{AppError, AppResult},
    llm::LlmManager,
    models::{ComposedRequest, ContentPart},
    prompt,
    session::FormSession,
};

/// Construye la petición sin tocar la red.
pub async fn compose(session: &FormSession) -> ComposedRequest {
    let attachment_parts = attachments::normalize_all(session.attachments()).await;
    prompt::compose_request(
        &session.patient,
        &session.clinical,
        &session.config,
        attachment_parts,
    )
}

/// Genera el informe. Sin clave de API falla antes de procesar nada.
pub async fn generate_letter(llm: &LlmManager, session: &FormSession) -> AppResult<String> {
    if !llm.has_credentials() {
        return Err(AppError::Configuration);
    }

    let request = compose(session).await;
    info!(
        "Petición compuesta: {} segmentos ({} caracteres de prompt), idioma {:?}, destinatario {}.",
        request.parts.len(),
        request.parts.first().and_then(ContentPart::as_text).map_or(0, str::len),
        session.config.target_language,
        session.config.audience
    );

    llm.generate(&request).await
}
