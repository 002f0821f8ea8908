pub mod filters;
pub mod image_conversion;
pub mod stats;

pub use filters::*;
pub use image_conversion::*;
pub use stats::*;
