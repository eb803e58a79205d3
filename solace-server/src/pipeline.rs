//! Pipeline wiring — builds the store, backend and dispatcher from config.

use std::sync::Arc;

use solace_core::{
    create_backend, CannedResponder, ConversationStore, CredentialProvider, Dispatcher,
    DispatcherOptions, MemoryStore, PgConversationStore, RiskClassifier, SolaceConfig,
    SolaceError,
};
use sqlx::PgPool;

/// Everything the HTTP layer needs.
pub struct Pipeline {
    pub dispatcher: Arc<Dispatcher>,
    pub store: Arc<dyn ConversationStore>,
    /// Present when the store is PostgreSQL-backed
    pub pool: Option<PgPool>,
}

/// Create the conversation store selected by `[database] backend`.
pub async fn create_store_from_config(
    config: &SolaceConfig,
) -> Result<(Arc<dyn ConversationStore>, Option<PgPool>), SolaceError> {
    match config.database.backend.as_str() {
        "postgres" => {
            let pool = solace_core::db::create_pool(&config.database).await?;
            solace_core::db::ensure_schema(&pool).await?;
            tracing::info!("Using PostgreSQL conversation store");
            Ok((Arc::new(PgConversationStore::new(pool.clone())), Some(pool)))
        }
        "memory" => {
            tracing::info!("Using in-memory conversation store");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        other => Err(SolaceError::invalid_config(format!(
            "Unknown database backend '{}'",
            other
        ))),
    }
}

/// Build a dispatcher over `store`, reading `[model]` and `[safety]`.
pub fn create_dispatcher_from_config(
    config: &SolaceConfig,
    store: Arc<dyn ConversationStore>,
    credentials: Arc<dyn CredentialProvider>,
) -> Result<Dispatcher, SolaceError> {
    let classifier = RiskClassifier::with_extra_phrases(&config.safety.extra_phrases);
    let responder = Arc::new(CannedResponder::new(classifier.clone()));
    let backend = create_backend(
        config.model.backend_config()?,
        classifier.clone(),
        responder.clone(),
    )?;

    let mut options = DispatcherOptions {
        credential_key: config.model.credential_key.clone(),
        ..DispatcherOptions::default()
    };
    if let Some(prompt) = &config.model.system_prompt {
        options.system_prompt = prompt.clone();
    }

    tracing::info!(
        backend = backend.name(),
        phrases = classifier.phrase_count(),
        "Dispatcher configured"
    );

    Ok(Dispatcher::new(
        classifier,
        Arc::from(backend),
        responder,
        store,
        credentials,
    )
    .with_options(options))
}

pub async fn build_pipeline(
    config: &SolaceConfig,
    credentials: Arc<dyn CredentialProvider>,
) -> anyhow::Result<Pipeline> {
    let (store, pool) = create_store_from_config(config).await?;
    let dispatcher = create_dispatcher_from_config(config, store.clone(), credentials)?;
    Ok(Pipeline {
        dispatcher: Arc::new(dispatcher),
        store,
        pool,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solace_core::StaticCredentials;

    #[tokio::test]
    async fn test_unknown_store_backend_is_rejected() {
        let config = SolaceConfig::from_toml_str(
            r#"
            [database]
            backend = "sqlite"
            "#,
        )
        .unwrap();
        match create_store_from_config(&config).await {
            Err(SolaceError::Config(e)) => assert!(e.to_string().contains("sqlite")),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("sqlite must not be accepted"),
        }
    }

    #[tokio::test]
    async fn test_default_config_builds_memory_pipeline() {
        let config = SolaceConfig::default();
        let pipeline = build_pipeline(&config, Arc::new(StaticCredentials::new()))
            .await
            .unwrap();
        assert_eq!(pipeline.store.name(), "memory");
        assert_eq!(pipeline.dispatcher.backend_name(), "remote");
        assert!(pipeline.pool.is_none());
    }

    #[tokio::test]
    async fn test_offline_backend_from_config() {
        let config = SolaceConfig::from_toml_str(
            r#"
            [model]
            backend = "offline"
            "#,
        )
        .unwrap();
        let (store, _) = create_store_from_config(&config).await.unwrap();
        let dispatcher =
            create_dispatcher_from_config(&config, store, Arc::new(StaticCredentials::new()))
                .unwrap();
        assert_eq!(dispatcher.backend_name(), "offline");
    }

    #[tokio::test]
    async fn test_unknown_model_backend_fails_wiring() {
        let config = SolaceConfig::from_toml_str(
            r#"
            [model]
            backend = "ofline"
            "#,
        )
        .unwrap();
        let (store, _) = create_store_from_config(&config).await.unwrap();
        let result =
            create_dispatcher_from_config(&config, store, Arc::new(StaticCredentials::new()));
        assert!(matches!(result, Err(SolaceError::Config(_))));
    }
}
