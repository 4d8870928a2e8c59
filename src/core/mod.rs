//! Core building blocks: environment composition, the task graph, and
//! condition evaluation.

pub mod condition;
pub mod environment;
pub mod graph;

pub use condition::{current_platform, evaluate, Admission};
pub use environment::{builtin_env, child_env, Environment, RunFacts};
pub use graph::{GraphError, TaskGraph};
