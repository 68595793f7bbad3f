pub mod abort_manager;
pub mod chat_manager;
pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod providers;
pub mod serde_utils;
pub mod storage_manager;
pub mod transport;
pub mod usage;
pub mod utils;

use std::path::Path;
use std::sync::Arc;

use chat_manager::ChatOrchestrator;
use config::{ChatConfig, Scenario};
use error::ChatError;
use logger::LogManager;
use models::ModelCatalog;
use storage_manager::kv::{KvStore, SqliteStore};
use storage_manager::sessions::get_history_record;
use storage_manager::settings::{load_selected_model, load_settings};
use transport::Transport;
use utils::{log_info, log_warn};

const DB_FILE: &str = "siliconchat.db";
const LOG_DIR: &str = "logs";

/// Process-wide state shared by every chat screen.
pub struct App {
    pub config: ChatConfig,
    pub catalog: ModelCatalog,
    pub store: Arc<dyn KvStore>,
    pub logs: Option<LogManager>,
}

/// Opens the database and log directory under `data_dir`.
pub fn setup(data_dir: impl AsRef<Path>, config: ChatConfig) -> anyhow::Result<App> {
    let data_dir = data_dir.as_ref();
    std::fs::create_dir_all(data_dir)?;

    let logs = match logger::init_logging(data_dir.join(LOG_DIR), tracing::Level::INFO) {
        Ok(manager) => Some(manager),
        Err(err) => {
            eprintln!("Logging disabled: {}", err);
            None
        }
    };

    let store = SqliteStore::open(data_dir.join(DB_FILE))
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;
    log_info("storage", format!("opened store in {}", data_dir.display()));

    let mut app = App::with_store(Arc::new(store), config);
    app.logs = logs;
    Ok(app)
}

impl App {
    pub fn with_store(store: Arc<dyn KvStore>, config: ChatConfig) -> Self {
        Self {
            config,
            catalog: ModelCatalog::default(),
            store,
            logs: None,
        }
    }

    /// Selected model if the catalog still knows it, the configured default otherwise.
    pub fn active_model(&self) -> String {
        let selected = load_selected_model(self.store.as_ref())
            .unwrap_or_else(|| load_settings(self.store.as_ref()).selected_model);
        if self.catalog.find(&selected).is_some() {
            return selected;
        }
        log_warn(
            "catalog",
            format!(
                "selected model {} is unknown, using {}",
                selected, self.config.default_model_id
            ),
        );
        self.config.default_model_id.clone()
    }

    /// Remote backend when a valid key is stored; the local simulator when none is.
    pub fn transport(&self) -> Result<Arc<dyn Transport>, ChatError> {
        let credential =
            providers::load_credential(self.store.as_ref()).map_err(ChatError::AuthFailure)?;
        transport::for_credential(credential, &self.config).map_err(ChatError::from)
    }

    /// Merges the remote model listing. Returns how many entries came back.
    pub async fn refresh_models(&mut self) -> usize {
        let credential = match providers::load_credential(self.store.as_ref()) {
            Ok(Some(credential)) => credential,
            Ok(None) => return 0,
            Err(kind) => {
                log_warn("catalog", format!("skipping refresh: {:?} api key", kind));
                return 0;
            }
        };
        let client = match transport::build_client(Some(self.config.request_timeout_ms)) {
            Ok(client) => client,
            Err(err) => {
                log_warn("catalog", format!("skipping refresh: {}", err));
                return 0;
            }
        };
        models::catalog::refresh_catalog(
            &mut self.catalog,
            &client,
            &self.config.api_base_url,
            credential.expose(),
        )
        .await
    }

    pub fn new_chat(&self, scenario: Scenario) -> Result<ChatOrchestrator, ChatError> {
        Ok(ChatOrchestrator::start(
            &self.active_model(),
            self.catalog.clone(),
            scenario,
            self.config.clone(),
            self.transport()?,
            self.store.clone(),
        ))
    }

    pub fn resume_chat(
        &self,
        session_id: &str,
        scenario: Scenario,
    ) -> Result<ChatOrchestrator, ChatError> {
        let record = get_history_record(self.store.as_ref(), session_id)
            .ok_or_else(|| ChatError::Storage(format!("history entry {} not found", session_id)))?;
        Ok(ChatOrchestrator::resume(
            &record,
            self.catalog.clone(),
            scenario,
            self.config.clone(),
            self.transport()?,
            self.store.clone(),
        ))
    }
}
