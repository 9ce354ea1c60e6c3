//! Estado en memoria del formulario (un informe por sesión).

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{
    Attachment, AttachmentCategory, AttachmentInfo, ClinicalRecord, GenerationConfig,
    PatientRecord,
};

/// Datos del formulario activo. Los adjuntos van indexados por categoría:
/// subir otro fichero a una categoría ocupada sustituye al anterior.
#[derive(Debug, Clone, Default)]
pub struct FormSession {
    pub patient: PatientRecord,
    pub clinical: ClinicalRecord,
    pub config: GenerationConfig,
    attachments: BTreeMap<AttachmentCategory, Attachment>,
}

/// Vista serializable de la sesión, sin el contenido de los ficheros.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub patient: PatientRecord,
    pub clinical: ClinicalRecord,
    pub config: GenerationConfig,
    pub attachments: Vec<AttachmentInfo>,
}

impl FormSession {
    pub fn update_patient(&mut self, patient: PatientRecord) {
        self.patient = patient;
    }

    pub fn update_clinical(&mut self, clinical: ClinicalRecord) {
        self.clinical = clinical;
    }

    pub fn update_config(&mut self, config: GenerationConfig) {
        self.config = config;
    }

    /// Guarda el adjunto en su categoría y devuelve el que había antes.
    pub fn put_attachment(&mut self, attachment: Attachment) -> Option<Attachment> {
        self.attachments.insert(attachment.category, attachment)
    }

    pub fn remove_attachment(&mut self, category: AttachmentCategory) -> Option<Attachment> {
        self.attachments.remove(&category)
    }

    /// Adjuntos en el orden de las categorías del formulario.
    pub fn attachments(&self) -> Vec<Attachment> {
        self.attachments.values().cloned().collect()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            patient: self.patient.clone(),
            clinical: self.clinical.clone(),
            config: self.config.clone(),
            attachments: self.attachments.values().map(AttachmentInfo::from).collect(),
        }
    }
}
