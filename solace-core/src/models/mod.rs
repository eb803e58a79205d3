pub mod draft;
pub mod message;
pub mod session;

pub use draft::{ResponseDraft, SuggestedTopic};
pub use message::{Message, SafetyFlag, Sender};
pub use session::Session;
