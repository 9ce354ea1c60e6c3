//! Composición del prompt para el informe de alta.
//!
//! Todo lo de este módulo es puro y determinista: no hace E/S. Los bloques
//! condicionales (validación de identidad, curso estándar, destinatario) son
//! funciones pequeñas que devuelven su variante de texto; `compose_request`
//! las ensambla.

use crate::models::{
    Audience, ClinicalRecord, ComposedRequest, ContentPart, GenerationConfig, Language,
    PatientRecord,
};

pub const LANGUAGE_PLACEHOLDER: &str = "{{language}}";
pub const AUDIENCE_PLACEHOLDER: &str = "{{audience}}";
pub const DISCHARGE_DATE_PLACEHOLDER: &str = "{{dischargeDate}}";

const PLACEHOLDERS: [&str; 3] = [
    LANGUAGE_PLACEHOLDER,
    AUDIENCE_PLACEHOLDER,
    DISCHARGE_DATE_PLACEHOLDER,
];

pub const NOT_PROVIDED: &str = "Not provided";
const EMPTY_FIELD: &str = "[Empty]";
const MISSING_DISCHARGE_DATE: &str = "Date: _____________";

pub const CROSS_CHECK_MARKER: &str = "CRITICAL VALIDATION";
pub const TRUST_DOCUMENTS_MARKER: &str = "TRUST THE DOCUMENTS";
pub const STANDARD_COURSE_MARKER: &str = "STANDARD CLINICAL COURSE";

/// Instrucción de sistema con marcadores `{{language}}`, `{{audience}}` y
/// `{{dischargeDate}}`.
pub const SYSTEM_INSTRUCTION_TEMPLATE: &str = r#"You are an AI assistant that writes professional medical discharge letters (Arztbriefe).

LETTER HEAD:
Every letter starts exactly with this header, whatever the output language:

Kaggle University Clinic
AI-Street
99999 Surgery

Discharge Date: {{dischargeDate}}

---

FORMATTING (PLAIN TEXT, NO MARKDOWN):
- Do not use Markdown syntax: no asterisks, no hashes, no underscores for emphasis.
- Section headings are written in UPPERCASE followed by a colon or a newline.
- Lists use simple hyphens (-).
- No bold text.

OUTPUT LANGUAGE: {{language}}
- The ENTIRE letter is written in {{language}}.
- Input written in any other language MUST be translated to {{language}}.
- The signatory position MUST be translated to {{language}} (e.g. "Facharzt" -> "Specialist", "Oberarzt" -> "Senior Physician").

TARGET AUDIENCE: {{audience}}
- patient: explain every medical term or complex concept immediately in brackets, e.g. "Appendektomie (Entfernung des Blinddarms)" or "Hypertension (high blood pressure)". Keep sentences simple.
- doctor: use standard medical terminology without explanations.

DATA RULES:
1. NO INVENTED NUMBERS: never invent lab values, dates or vital signs that are not in the input. When data is missing, use qualitative formulations ("Lab values showed no significant abnormalities."). Facts that cannot be verified are omitted or marked "Not documented".
2. CHRONOLOGY: the history comes from previous letters; the clinical course covers the CURRENT stay only.
3. LAB VALUES: summarize trends instead of listing raw data.
4. MEDICATION: separate admission medication from discharge medication and flag severe interactions in the discharge medication.
5. RECOMMENDATIONS: only for the current stay.
6. DOCUMENT VALIDATION: follow the validation block given in the request.

STRUCTURE:
[No heading] Salutation
DIAGNOSEN / DIAGNOSES
ANAMNESE / HISTORY
AUFNAHMEBEFUND / ADMISSION FINDINGS
OPERATION / PROCEDURES
POSTOPERATIVER VERLAUF / CLINICAL COURSE
ENTLASSUNGSSTATUS / STATUS AT DISCHARGE
VORMEDIKATION / ADMISSION MEDICATION
MEDIKATION BEI ENTLASSUNG / DISCHARGE MEDICATION
EMPFEHLUNGEN / RECOMMENDATIONS
[Closing sentence]
[Signatory name]
[Signatory position, translated]
DISCLAIMER

DISCLAIMER TEXT:
- DE: "Hinweis: Dieser Arztbrief wurde mit Unterstützung eines KI-gestützten Dokumentationssystems erstellt und ersetzt nicht die ärztliche Beurteilung."
- EN: "Note: This discharge letter was generated with the support of an AI-based documentation system and does not replace medical judgment."
"#;

// ---------------------------------------------------------------------
// MARCADORES
// ---------------------------------------------------------------------

/// Colapsa `{{`/`}}` en los valores insertados para que ningún valor del
/// usuario pueda reintroducir un marcador.
fn neutralize(value: &str) -> String {
    let mut out = value.to_string();
    while out.contains("{{") || out.contains("}}") {
        out = out.replace("{{", "{").replace("}}", "}");
    }
    out
}

/// Sustituye todas las apariciones de cada marcador.
pub fn substitute_placeholders(
    template: &str,
    language: Language,
    audience: Audience,
    discharge_date: &str,
) -> String {
    let discharge_date = if discharge_date.trim().is_empty() {
        MISSING_DISCHARGE_DATE.to_string()
    } else {
        neutralize(discharge_date.trim())
    };

    template
        .replace(LANGUAGE_PLACEHOLDER, language.label())
        .replace(AUDIENCE_PLACEHOLDER, audience.as_str())
        .replace(DISCHARGE_DATE_PLACEHOLDER, &discharge_date)
}

pub fn has_residual_placeholders(text: &str) -> bool {
    PLACEHOLDERS.iter().any(|token| text.contains(token))
}

// ---------------------------------------------------------------------
// BLOQUES CONDICIONALES
// ---------------------------------------------------------------------

/// Bloque de validación de identidad: contrastar con el formulario si hay
/// datos, o confiar en los documentos si no los hay.
pub fn validation_instruction(patient: &PatientRecord) -> String {
    if patient.has_identity() {
        format!(
            "**{CROSS_CHECK_MARKER}:**\n\
             - Check the Patient Name and Date of Birth in each document.\n\
             - **COMPARE** with the Form Data: \"{} {}\", DOB: {}.\n\
             - **IF** a document contains a Name or DOB that **CLEARLY CONTRADICTS** the Form Data, **IGNORE** that document.\n\
             - **IF** it matches OR is ambiguous/missing in the document, **USE IT**.",
            neutralize(patient.first_name.trim()),
            neutralize(patient.last_name.trim()),
            neutralize(patient.date_of_birth.trim()),
        )
    } else {
        format!(
            "**VALIDATION:** Patient demographics were not provided in the input form. \
             **{TRUST_DOCUMENTS_MARKER}** and extract the patient details from them."
        )
    }
}

pub fn audience_instruction(audience: Audience) -> &'static str {
    match audience {
        Audience::Patient => {
            "Target audience is: **PATIENT**.\n   - Explain ALL technical terms in brackets and keep the sentences simple."
        }
        Audience::Doctor => {
            "Target audience is: **DOCTOR**.\n   - Use standard medical terminology without explanations."
        }
    }
}

/// Directiva de curso estándar: narrativa cualitativa sin cifras.
pub fn standard_course_directive(language: Language) -> String {
    format!(
        "[INSTRUCTION]: The user requested a {STANDARD_COURSE_MARKER} (complications-free).\n\
         - Write this section in **{}**.\n\
         - Use **QUALITATIVE** descriptions (e.g. \"pain was well controlled\", \"primary wound healing\", \"mobilization successful\").\n\
         - **DO NOT** invent specific numbers, dates or lab values.\n\
         - Derive the narrative from the Diagnosis and Operation provided above.",
        language.label()
    )
}

/// Texto final de la sección "Clinical Course".
pub fn clinical_course_text(clinical: &ClinicalRecord, config: &GenerationConfig) -> String {
    let course = neutralize(clinical.clinical_course.trim());

    if config.use_standard_course {
        let directive = standard_course_directive(config.target_language);
        if course.is_empty() {
            directive
        } else {
            format!("{course}\n\n{directive}")
        }
    } else if course.is_empty() {
        format!(
            "{NOT_PROVIDED}. If information is available in attached documents, summarize it here."
        )
    } else {
        course
    }
}

fn or_not_provided(value: &str) -> String {
    or_marker(value, NOT_PROVIDED)
}

fn or_empty(value: &str) -> String {
    or_marker(value, EMPTY_FIELD)
}

fn or_marker(value: &str, marker: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        marker.to_string()
    } else {
        neutralize(value)
    }
}

// ---------------------------------------------------------------------
// ENSAMBLADO
// ---------------------------------------------------------------------

/// Segmento de texto principal: instrucciones, demografía y datos clínicos.
pub fn compose_prompt_text(
    patient: &PatientRecord,
    clinical: &ClinicalRecord,
    config: &GenerationConfig,
) -> String {
    let language = config.target_language.label();

    format!(
        r#"
PLEASE GENERATE A DISCHARGE LETTER BASED ON THE FOLLOWING INFORMATION.

*** CRITICAL INSTRUCTIONS ***
1. **LANGUAGE:** The output must be strictly in: **{language}**.
   - Input in any other language is TRANSLATED to {language}.
2. **AUDIENCE:** {audience}
3. **DATA FIDELITY:**
   - DO NOT INVENT NUMBERS. Use general/qualitative formulations if data is missing.
   - Example: "Lab values showed no significant abnormalities" instead of an invented value.
4. **SIGNATORY:**
   - Translate the Doctor's Position to {language} (e.g. "Facharzt" -> "Specialist", "Oberarzt" -> "Senior Physician").

{validation}

DATA MERGING INSTRUCTIONS:
1. **Comorbidities:** Extract pre-existing conditions from "Previous Letters" (Vorbriefe).
2. **Clinical Course:** STRICTLY SEPARATE current events from past history. Only describe the current stay in "Verlauf".
3. **Labs:** Integrate lab trends into the "Verlauf".
4. **Medication:** Separate "Admission Medication" (from history) and "Discharge Medication".
5. **Recommendations:** ONLY for the current stay.

--- SIGNATORY ---
Doctor: {doctor_name}
Position (Input): {doctor_position} (Please translate this to {language})

--- PATIENT DEMOGRAPHICS (Form Input) ---
First Name: {first_name}
Last Name: {last_name}
Birthdate: {dob}
Admission Date: {admission}
Discharge Date: {discharge}

--- CLINICAL INFORMATION ---
Diagnosis:
{diagnosis}

Anamnesis (History):
{anamnesis}

Findings (Physical, Lab, etc.):
{findings}

Operation / Procedures:
{operation}

Clinical Course:
{course}

Medication:
{medication}

Recommendations / Follow-up:
{recommendations}

--- ATTACHED DOCUMENTS & IMAGES ---
The following files are attached. Extract relevant information from VALID documents to supplement the text fields above.
"#,
        audience = audience_instruction(config.audience),
        validation = validation_instruction(patient),
        doctor_name = or_not_provided(&config.doctor_name),
        doctor_position = or_not_provided(&config.doctor_position),
        first_name = or_empty(&patient.first_name),
        last_name = or_empty(&patient.last_name),
        dob = or_empty(&patient.date_of_birth),
        admission = or_empty(&patient.admission_date),
        discharge = or_empty(&patient.discharge_date),
        diagnosis = or_not_provided(&clinical.diagnosis),
        anamnesis = or_not_provided(&clinical.anamnesis),
        findings = or_not_provided(&clinical.findings),
        operation = or_not_provided(&clinical.operation),
        course = clinical_course_text(clinical, config),
        medication = or_not_provided(&clinical.medication),
        recommendations = or_not_provided(&clinical.recommendations),
    )
}

/// Ensambla la petición completa: instrucción de sistema sustituida, el
/// segmento de texto principal y, detrás, los segmentos de los adjuntos en
/// su orden. El texto extraído de los adjuntos también pasa por
/// `neutralize`.
pub fn compose_request(
    patient: &PatientRecord,
    clinical: &ClinicalRecord,
    config: &GenerationConfig,
    attachment_parts: Vec<ContentPart>,
) -> ComposedRequest {
    let system_instruction = substitute_placeholders(
        SYSTEM_INSTRUCTION_TEMPLATE,
        config.target_language,
        config.audience,
        &patient.discharge_date,
    );
    debug_assert!(!has_residual_placeholders(&system_instruction));

    let prompt_text = compose_prompt_text(patient, clinical, config);
    debug_assert!(!has_residual_placeholders(&prompt_text));

    let mut parts = Vec::with_capacity(attachment_parts.len() + 1);
    parts.push(ContentPart::Text(prompt_text));
    parts.extend(attachment_parts.into_iter().map(|part| match part {
        ContentPart::Text(text) => ContentPart::Text(neutralize(&text)),
        binary => binary,
    }));

    ComposedRequest {
        system_instruction,
        parts,
    }
}
