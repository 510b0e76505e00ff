//! Request handlers.

pub mod health;
pub mod renders;

pub use health::*;
pub use renders::*;
