pub mod core;
pub mod corpus;
pub mod dac;
pub mod evaluation;
pub mod mapping;
pub mod matcher;
pub mod metrics;
pub mod ml;
pub mod ranker;
pub mod storage;

// Re-export the types most callers touch.
pub use self::core::{ChannelId, Document, PipelineError, Prediction};
pub use dac::DacModel;
pub use mapping::ClusterMapping;
pub use matcher::{Matcher, MatcherTrainConfig};
pub use metrics::{EnsembleStrategy, Metric};
pub use ranker::{Ranker, RankerTrainConfig};
