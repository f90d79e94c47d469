pub mod document;
pub mod error;

pub use document::{ChannelId, Document, Prediction};
pub use error::PipelineError;
