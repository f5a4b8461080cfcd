//! Data models

mod event;
mod host;
mod l1;
mod node;

pub use event::*;
pub use host::*;
pub use l1::*;
pub use node::*;
