//! Shared handler state. Every collaborator is built once at startup and
//! passed in explicitly.

use std::sync::Arc;

use vera_core::{
    AdminQueries, AnswerEngine, ChatOrchestrator, ChatSettings, ConversationLedger, CoreConfig, Database,
    IdentityStore, LedgerLimits, SessionAuthenticator, SpeechSynthesizer, TokenSigner,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<CoreConfig>,
    pub identities: IdentityStore,
    pub admin: AdminQueries,
    pub chat: ChatOrchestrator,
}

impl AppState {
    /// Open the database and build the configured engine and synthesizer.
    pub fn build(config: CoreConfig) -> Result<Self, String> {
        let db = Database::open(&config.server.database_path)
            .map_err(|e| format!("cannot open database {}: {}", config.server.database_path, e))?;
        let engine = vera_router::engine_from_config(&config.engine).map_err(|e| e.to_string())?;
        let speech = vera_voice::synthesizer_from_config(&config.speech, &config.server.audio_dir)
            .map_err(|e| e.to_string())?;
        Ok(Self::from_parts(config, db, engine, speech))
    }

    pub fn from_parts(
        config: CoreConfig,
        db: Database,
        engine: Arc<dyn AnswerEngine>,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Self {
        let auth = SessionAuthenticator::new(
            db.clone(),
            TokenSigner::new(config.auth.secret_key.trim()),
            config.auth.token_ttl(),
        );
        let ledger = ConversationLedger::new(
            db.clone(),
            LedgerLimits {
                max_content_chars: config.chat.max_content_chars,
                max_history_limit: config.chat.max_history_limit,
            },
        );
        let chat = ChatOrchestrator::new(auth, ledger, engine, speech, ChatSettings::from(&config.chat));
        Self {
            identities: IdentityStore::new(db.clone()),
            admin: AdminQueries::new(db),
            chat,
            config: Arc::new(config),
        }
    }
}
