//! Provides types that represent the user's instructions, e.g. manifest and task files, and the
//! machinery that compiles them into host scripts.

pub mod action;
pub mod context;
pub mod managed;
pub mod manifest;
pub mod node;
pub mod plan;
pub mod script;
pub mod session;
pub mod strategy;
pub mod task;

#[doc(inline)]
pub use action::Action;

#[doc(inline)]
pub use context::Context;

#[doc(inline)]
pub use manifest::Manifest;

#[doc(inline)]
pub use plan::Plan;

#[doc(inline)]
pub use session::Session;

#[doc(inline)]
pub use task::Task;
