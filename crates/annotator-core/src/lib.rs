pub mod config;
pub mod dom;
pub mod error;
pub mod marker;
pub mod selector;
pub mod tree;

pub use config::*;
pub use dom::*;
pub use error::*;
pub use marker::*;
pub use selector::*;
pub use tree::*;
