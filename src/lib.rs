// ABOUTME: Library root for dockr - declarative stacks planned and applied against a container runtime.
// ABOUTME: The main binary is in main.rs.

pub mod apply;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod hooks;
pub mod output;
pub mod plan;
pub mod render;
pub mod runtime;
pub mod snapshot;
pub mod types;

pub use engine::{Engine, EngineSettings, ResourceStatus};
