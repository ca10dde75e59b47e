pub mod announce;
pub mod classifier;
pub mod context;
pub mod debounce;
pub mod engine;
pub mod menu;
pub mod registry;
pub mod runtime;
pub mod timer;

pub use announce::*;
pub use classifier::*;
pub use context::*;
pub use debounce::*;
pub use engine::*;
pub use menu::*;
pub use registry::*;
pub use runtime::*;
pub use timer::*;
