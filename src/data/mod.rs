pub mod loader;
pub mod stack;
pub mod synthetic;
pub mod transformer;

pub use loader::*;
pub use stack::ImageStack;
pub use transformer::*;
