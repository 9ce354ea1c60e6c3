//! Normalización de adjuntos: convierte cada fichero subido en segmentos de
//! contenido para el modelo.
//!
//! - Documentos Word: se extrae el texto plano localmente (OOXML = ZIP con
//!   `word/document.xml`).
//! - Imágenes y PDF: se envían tal cual en base64 con su tipo MIME; el modelo
//!   los interpreta de forma nativa. No hay OCR ni extracción de PDF local.
//!
//! También contiene la frontera de entrada de ficheros (lista de tipos MIME
//! admitidos y codificación como data URL).

use std::io::{Cursor, Read};

use base64::{engine::general_purpose, Engine as _};
use futures::future::join_all;
use mime_guess::Mime;
use tracing::{debug, error, warn};
use xml::reader::{EventReader, XmlEvent};
use zip::ZipArchive;

use crate::{
    error::{AppError, AppResult},
    models::{Attachment, AttachmentCategory, ContentPart},
};

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const DOC_MIME: &str = "application/msword";
pub const PDF_MIME: &str = "application/pdf";

/// Valor `accept` del input de fichero para cada categoría.
pub fn accept_attribute(category: AttachmentCategory) -> &'static str {
    if category.images_only() {
        "image/*"
    } else {
        "image/*,application/pdf,application/msword,application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    }
}

pub fn is_word_document(mime_type: &str) -> bool {
    let mime = mime_type.trim();
    mime.eq_ignore_ascii_case(DOCX_MIME) || mime.eq_ignore_ascii_case(DOC_MIME)
}

/// `tipo/subtipo` en minúsculas, sin parámetros (`; charset=...`).
fn mime_essence(mime_type: &str) -> Option<String> {
    mime_type
        .trim()
        .parse::<Mime>()
        .ok()
        .map(|mime| mime.essence_str().to_ascii_lowercase())
}

/// Comprueba la lista de tipos admitidos para una categoría.
pub fn is_accepted(category: AttachmentCategory, mime_type: &str) -> bool {
    let Some(mime) = mime_essence(mime_type) else {
        return false;
    };
    if mime.starts_with("image/") {
        return true;
    }
    if category.images_only() {
        return false;
    }
    mime == PDF_MIME || is_word_document(&mime)
}

/// Tipo MIME efectivo del fichero. Si el navegador no envía uno útil, se
/// deduce de la extensión.
pub fn resolve_mime_type(declared: Option<&str>, file_name: &str) -> String {
    match declared.and_then(mime_essence) {
        Some(mime) if mime != "application/octet-stream" => mime,
        _ => mime_guess::from_path(file_name)
            .first()
            .map(|m| m.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string()),
    }
}

/// Codifica los bytes como `data:<mime>;base64,<contenido>`.
pub fn encode_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        general_purpose::STANDARD.encode(bytes)
    )
}

/// Quita la cabecera `data:...;base64,` si existe.
pub fn strip_data_url_header(data_url: &str) -> &str {
    if data_url.starts_with("data:") {
        if let Some((_, payload)) = data_url.split_once(',') {
            return payload;
        }
    }
    data_url
}

/// Valida un fichero recibido y lo convierte en un `Attachment`.
pub fn build_attachment(
    category: AttachmentCategory,
    file_name: &str,
    declared_mime: Option<&str>,
    bytes: &[u8],
) -> AppResult<Attachment> {
    if bytes.is_empty() {
        return Err(AppError::EmptyFile(file_name.to_string()));
    }

    let mime_type = resolve_mime_type(declared_mime, file_name);
    if !is_accepted(category, &mime_type) {
        return Err(AppError::AttachmentRejected {
            category,
            mime_type,
        });
    }

    Ok(Attachment {
        file_name: file_name.to_string(),
        size_bytes: bytes.len() as u64,
        data_url: encode_data_url(&mime_type, bytes),
        mime_type,
        category,
    })
}

// ---------------------------------------------------------------------
// EXTRACCIÓN DE WORD
// ---------------------------------------------------------------------

/// Extrae el texto plano de un `.docx` en memoria.
///
/// Los `.doc` binarios antiguos no son ZIP y fallan aquí; el llamador lo
/// trata como aviso, no como error fatal.
pub fn extract_docx_text(file_name: &str, bytes: &[u8]) -> AppResult<String> {
    let fail = |reason: String| AppError::AttachmentExtraction {
        file_name: file_name.to_string(),
        reason,
    };

    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| fail(e.to_string()))?;
    let mut part = archive
        .by_name("word/document.xml")
        .map_err(|e| fail(format!("word/document.xml: {e}")))?;

    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| fail(e.to_string()))?;

    extract_text_from_document_xml(&xml).map_err(fail)
}

/// Recorre `word/document.xml` y devuelve el texto de los `w:t`, con
/// tabuladores, saltos de línea y una línea en blanco entre párrafos.
pub fn extract_text_from_document_xml(xml: &str) -> Result<String, String> {
    let reader = EventReader::new(xml.as_bytes());
    let mut out = String::new();
    let mut in_text = false;
    // Las definiciones de tabulación (`w:tabs/w:tab`) no son texto.
    let mut in_tab_stops = false;

    for event in reader {
        match event.map_err(|e| e.to_string())? {
            XmlEvent::StartElement { name, .. } => match name.local_name.as_str() {
                "t" => in_text = true,
                "tabs" => in_tab_stops = true,
                "tab" if !in_tab_stops => out.push('\t'),
                "br" | "cr" => out.push('\n'),
                _ => {}
            },
            XmlEvent::EndElement { name } => match name.local_name.as_str() {
                "t" => in_text = false,
                "tabs" => in_tab_stops = false,
                "p" => out.push_str("\n\n"),
                _ => {}
            },
            XmlEvent::Characters(content)
            | XmlEvent::Whitespace(content)
            | XmlEvent::CData(content)
                if in_text =>
            {
                out.push_str(&content)
            }
            _ => {}
        }
    }

    Ok(out.trim_end().to_string())
}

// ---------------------------------------------------------------------
// NORMALIZACIÓN
// ---------------------------------------------------------------------

fn category_tag(category: AttachmentCategory) -> String {
    category.as_str().to_uppercase()
}

fn word_failure_notice(att: &Attachment) -> ContentPart {
    ContentPart::Text(format!(
        "\n[ERROR: Could not parse Word document: {} ({}). Ensure it is a valid .docx file.]\n",
        att.file_name,
        category_tag(att.category)
    ))
}

/// Segmentos para un adjunto cuyo procesamiento no llegó a terminar.
fn normalize_failure(att: &Attachment) -> Vec<ContentPart> {
    if is_word_document(&att.mime_type) {
        return vec![word_failure_notice(att)];
    }
    vec![ContentPart::Text(format!(
        "\n[ATTACHMENT: {} - Filename: {}]\n[ERROR: The file could not be processed and is not included.]\n",
        category_tag(att.category),
        att.file_name
    ))]
}

/// Convierte un adjunto en su grupo de segmentos (contiguos).
pub fn normalize(att: &Attachment) -> Vec<ContentPart> {
    let payload = strip_data_url_header(&att.data_url);

    if is_word_document(&att.mime_type) {
        let extracted = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| AppError::AttachmentExtraction {
                file_name: att.file_name.clone(),
                reason: format!("base64 inválido: {e}"),
            })
            .and_then(|bytes| extract_docx_text(&att.file_name, &bytes));

        return match extracted {
            Ok(text) => {
                debug!(
                    "Texto extraído de {} ({} caracteres)",
                    att.file_name,
                    text.len()
                );
                vec![ContentPart::Text(format!(
                    "\n[ATTACHMENT: {} - Filename: {} (Text Extracted from Word Doc)]\n{}\n",
                    category_tag(att.category),
                    att.file_name,
                    text
                ))]
            }
            Err(err) => {
                warn!("{err}. Se continúa con el resto de adjuntos.");
                vec![word_failure_notice(att)]
            }
        };
    }

    vec![
        ContentPart::Text(format!(
            "\n[ATTACHMENT: {} - Filename: {}]\n",
            category_tag(att.category),
            att.file_name
        )),
        ContentPart::Binary {
            mime_type: att.mime_type.clone(),
            data: payload.to_string(),
        },
    ]
}

/// Normaliza todos los adjuntos en paralelo (la extracción de Word va al pool
/// bloqueante) y devuelve los segmentos en el orden de entrada.
pub async fn normalize_all(attachments: Vec<Attachment>) -> Vec<ContentPart> {
    let tasks = attachments.into_iter().map(|att| async move {
        let fallback = att.clone();
        match tokio::task::spawn_blocking(move || normalize(&att)).await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Fallo normalizando {}: {}", fallback.file_name, e);
                normalize_failure(&fallback)
            }
        }
    });

    join_all(tasks).await.into_iter().flatten().collect()
}
