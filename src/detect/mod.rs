pub mod pipeline;
pub mod types;

pub use pipeline::DetectPipeline;
pub use types::{DetectOutcome, Detection, ModelKind};
