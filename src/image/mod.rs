pub mod annotate;
pub mod loader;

pub use annotate::{AnnotationContext, Annotator};
pub use loader::ImageLoader;
