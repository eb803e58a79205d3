pub mod canned;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod credentials;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod store;

pub use canned::{CannedResponder, CRISIS_RESPONSE};
pub use classifier::{Classification, RiskClassifier};
pub use completion::{
    create_backend, BackendConfig, ChatCompletionClient, ClientError, CompletionBackend,
    CompletionConfig, OfflineBackend,
};
pub use config::SolaceConfig;
pub use credentials::{ApiKey, CredentialProvider, EnvCredentials, StaticCredentials};
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatched, Dispatcher, DispatcherOptions};
pub use error::SolaceError;
pub use models::{Message, ResponseDraft, SafetyFlag, Sender, Session, SuggestedTopic};
pub use store::{ConversationStore, MemoryStore, PgConversationStore, StoreError};
