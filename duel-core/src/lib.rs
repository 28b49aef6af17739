pub mod dictionary;
pub mod evaluator;
pub mod reaper;
pub mod registry;
pub mod room;

// Re-export main components
pub use dictionary::*;
pub use evaluator::*;
pub use reaper::*;
pub use registry::*;
pub use room::*;
