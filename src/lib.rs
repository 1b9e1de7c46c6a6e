//! formlingo: bounded-concurrency translation of form fields for bilingual
//! prompt templates.
//!
//! Build one [`TranslationService`] per process and share it; each user run
//! gets its own [`RunNotices`].

pub mod config;
pub mod gate;
pub mod metrics;
pub mod notices;
pub mod templates;
pub mod translate;
pub mod worker;

use std::sync::Arc;

use tracing::{info, warn};

pub use config::{ConfigError, TranslateConfig};
pub use notices::RunNotices;
pub use translate::{
    BatchOutcome, FallbackReason, FieldOutcome, TextTranslator, TranslateError, TranslationService,
};

use translate::libre::LibreTranslateClient;

/// Initialize tracing from `RUST_LOG`, defaulting to info for this crate.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("formlingo=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the process-wide service from `config`, wiring the HTTP backend when
/// one is configured. A backend that fails to initialize is logged and left
/// out; translation then degrades to fallbacks instead of failing startup.
pub fn build_service(config: TranslateConfig) -> Result<Arc<TranslationService>, ConfigError> {
    config.validate()?;
    let backend: Option<Arc<dyn TextTranslator>> = match LibreTranslateClient::from_config(&config) {
        Some(Ok(client)) => {
            info!(target_lang = %config.target_lang, "translation backend initialized");
            Some(Arc::new(client))
        }
        Some(Err(e)) => {
            warn!(error = %e, "translation backend init failed, translation disabled");
            None
        }
        None => {
            warn!("no translation backend configured, fields will keep their original text");
            None
        }
    };
    Ok(Arc::new(TranslationService::new(config, backend)?))
}
