//! Declarative configuration management compiled to checked shell scripts.
//!
//! # YAML file types
//!
//! Manifest files and Task files. These are just the names for the file types; you can think of
//! them in whatever terms work for you, e.g. playbooks, roles and profiles, etc. A manifest names
//! the hosts it applies to, the task files it includes, and the settings of any software
//! components its tasks install. A task lists [core::Action]s.
//!
//! # Program flow
//!
//! This section is meant specifically for developers writing code for Cairn. If you are using
//! Cairn to manage systems, you don't need to read this section.
//!
//! 1. On the control node, the user invokes Cairn via the `cairn` binary, which loads a
//!    [core::Plan] from manifest files and a [config::Config] from the configuration directory.
//!
//! 2. For each host, the plan's tasks are turned into a flat list of [core::Action]s. Components
//!    listed under a task's `install` key are expanded into actions by the installation strategy
//!    resolver in [core::strategy].
//!
//! 3. Every action is validated before anything is emitted. A single bad option key aborts the
//!    host's compilation with no partial output.
//!
//! 4. Each action is compiled, inside a [core::Session], into labeled, fail-fast
//!    [core::script::Fragment]s. Fragments that share an execution mode are grouped into one
//!    remote shell script; uploads and controller-side commands become their own steps.
//!
//! 5. [run_plan] connects to each host over SSH and runs the resulting steps in order, reporting
//!    each step's outcome.

pub mod config;
pub mod core;
pub mod error;
#[cfg(feature = "openssh")]
pub mod run_plan;

#[doc(inline)]
pub use error::{Error, Result};

#[cfg(feature = "openssh")]
#[doc(inline)]
pub use run_plan::run_plan;
