pub mod detector;
pub mod registry;

pub use detector::Detector;
pub use registry::{ModelRegistry, ModelStats, RegistryStats};
