//! Modelos de dominio (datos del paciente, datos clínicos, configuración de
//! generación, adjuntos y segmentos de contenido para el modelo).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Datos demográficos del formulario. Un campo vacío equivale a "no informado".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientRecord {
    pub first_name: String,
    pub last_name: String,
    #[serde(alias = "dob")]
    pub date_of_birth: String,
    pub admission_date: String,
    pub discharge_date: String,
}

impl PatientRecord {
    /// Indica si el usuario ha rellenado algún dato identificativo
    /// (nombre, apellido o fecha de nacimiento).
    pub fn has_identity(&self) -> bool {
        [&self.first_name, &self.last_name, &self.date_of_birth]
            .iter()
            .any(|field| !field.trim().is_empty())
    }
}

/// Campos clínicos de texto libre, todos opcionales.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClinicalRecord {
    pub diagnosis: String,
    pub anamnesis: String,
    pub findings: String,
    pub operation: String,
    pub clinical_course: String,
    pub medication: String,
    pub recommendations: String,
}

/// Idioma de salida del informe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    De,
    En,
}

impl Language {
    /// Etiqueta legible que se inserta en las instrucciones del modelo.
    pub fn label(&self) -> &'static str {
        match self {
            Self::De => "GERMAN (Deutsch)",
            Self::En => "ENGLISH",
        }
    }
}

/// Destinatario del informe: controla el vocabulario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    Doctor,
    Patient,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Doctor => "doctor",
            Self::Patient => "patient",
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cargos sugeridos en el formulario. El campo sigue siendo texto libre.
pub const SUGGESTED_POSITIONS: &[&str] = &[
    "Resident",
    "Specialist",
    "Senior Physician",
    "Chief Physician",
];

/// Opciones de generación elegidas en el formulario.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    #[serde(alias = "language")]
    pub target_language: Language,
    pub audience: Audience,
    pub use_standard_course: bool,
    pub doctor_name: String,
    pub doctor_position: String,
}

/// Rol semántico de un adjunto. Como máximo un adjunto por categoría.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentCategory {
    OpReport,
    Letter,
    Lab,
    MedPlan,
    MicroBio,
    PreOp,
    PostOp,
}

impl AttachmentCategory {
    pub fn all() -> &'static [AttachmentCategory] {
        &[
            Self::OpReport,
            Self::Letter,
            Self::Lab,
            Self::MedPlan,
            Self::MicroBio,
            Self::PreOp,
            Self::PostOp,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpReport => "opreport",
            Self::Letter => "letter",
            Self::Lab => "lab",
            Self::MedPlan => "medplan",
            Self::MicroBio => "microbio",
            Self::PreOp => "preop",
            Self::PostOp => "postop",
        }
    }

    /// Etiqueta para el formulario.
    pub fn label(&self) -> &'static str {
        match self {
            Self::OpReport => "OP Report (PDF/Word/Img)",
            Self::Letter => "Previous Letter",
            Self::Lab => "Lab Report",
            Self::MedPlan => "Medication Plan",
            Self::MicroBio => "Microbiology",
            Self::PreOp => "Pre-op Image",
            Self::PostOp => "Post-op Image",
        }
    }

    /// Las imágenes pre y postoperatorias sólo admiten ficheros de imagen.
    pub fn images_only(&self) -> bool {
        matches!(self, Self::PreOp | Self::PostOp)
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
    }
}

impl fmt::Display for AttachmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fichero subido por el usuario, ya codificado como data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub size_bytes: u64,
    /// Data URL completa, p. ej. `data:application/pdf;base64,JVBERi0...`.
    pub data_url: String,
    pub mime_type: String,
    pub category: AttachmentCategory,
}

/// Resumen de un adjunto para el frontend (sin el contenido).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentInfo {
    pub category: AttachmentCategory,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl From<&Attachment> for AttachmentInfo {
    fn from(att: &Attachment) -> Self {
        Self {
            category: att.category,
            file_name: att.file_name.clone(),
            size_bytes: att.size_bytes,
            mime_type: att.mime_type.clone(),
        }
    }
}

/// Segmento de contenido de la petición al modelo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Base64 sin la cabecera de data URL.
    Binary { mime_type: String, data: String },
}

impl ContentPart {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary { .. } => None,
        }
    }
}

/// Petición compuesta lista para enviar al modelo. Se construye en cada
/// generación y no se guarda.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedRequest {
    pub system_instruction: String,
    pub parts: Vec<ContentPart>,
}
