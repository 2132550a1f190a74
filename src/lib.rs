pub mod admin;
pub mod classifier;
pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod extract;
pub mod identity;
pub mod message;
pub mod milter;
pub mod pipeline;
pub mod store;

pub use classifier::{Classification, MessageClassifier};
pub use config::Config;
pub use identity::IdentityGenerator;
pub use message::InboundMessage;
pub use milter::Milter;
pub use pipeline::{Disposition, PipelineError, TokenPipeline};
pub use store::{IdentityRecord, IdentityStatus, IdentityStore};
