//! Chat quiz channel
//!
//! Inbound webhooks are parsed ([`input`]), deduplicated ([`dedupe`]) and fed to
//! the [`machine::ConversationMachine`], which walks the user through topic
//! selection and a quiz run, replying through a [`transport::ChatTransport`].

pub mod dedupe;
pub mod identity;
pub mod input;
pub mod machine;
pub mod state;
pub mod transport;

pub use dedupe::MessageDeduplicator;
pub use identity::{InMemoryUserDirectory, MongoUserDirectory, UserDirectory};
pub use input::{parse_inbound, InboundMessage};
pub use machine::{ChatDeps, ConversationMachine};
pub use state::{ConversationState, QuizItem, QuizRun};
pub use transport::{ChatTransport, ConvoniteTransport, LogTransport};
