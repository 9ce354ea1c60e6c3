use std::sync::{Arc, Mutex};
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use crate::{config::AppConfig, llm::LlmManager, session::FormSession};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub llm_manager: LlmManager,
    pub session: Arc<Mutex<FormSession>>,
    pub status: Arc<Mutex<Status>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        llm_manager: LlmManager,
        shutdown_sender: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            config,
            llm_manager,
            session: Arc::new(Mutex::new(FormSession::default())),
            status: Arc::new(Mutex::new(Status {
                is_busy: false,
                message: "Servidor listo.".to_string(),
                ..Default::default()
            })),
            shutdown_sender: Arc::new(Mutex::new(shutdown_sender)),
        }
    }
}

/// Estado visible de la generación. `is_busy` bloquea un segundo envío
/// mientras haya una llamada en curso.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    /// Error de la última generación; se limpia al empezar otra.
    pub last_error: Option<String>,
    pub last_letter: Option<String>,
    pub last_generated_at: Option<DateTime<Utc>>,
}
