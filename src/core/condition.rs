//! Declarative condition evaluation.
//!
//! All sub-conditions of a gate AND together; the first unsatisfied one
//! produces the skip reason. Environment checks run against the task's
//! effective environment, file checks against the project root.

use crate::config::types::ConditionConfig;
use crate::core::environment::Environment;
use std::path::Path;

/// Values accepted as "true" by `env_true`, case-insensitively.
const TRUTHY: &[&str] = &["1", "true", "yes", "on"];

/// The outcome of evaluating a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The task may run.
    Admitted,

    /// The task is gated out, with a reason for the skip report.
    Denied(String),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// The platform identifier used by `platforms` conditions.
pub fn current_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        os => os,
    }
}

/// Evaluate a declarative condition.
pub fn evaluate(condition: &ConditionConfig, env: &Environment, root: &Path) -> Admission {
    if !condition.platforms.is_empty() {
        let platform = current_platform();
        if !condition.platforms.iter().any(|p| p.as_str() == platform) {
            return Admission::Denied(format!(
                "platform '{platform}' not in [{}]",
                condition.platforms.join(", ")
            ));
        }
    }

    for var in &condition.env_set {
        if !env.contains(var) {
            return Admission::Denied(format!("environment variable '{var}' is not set"));
        }
    }

    for var in &condition.env_not_set {
        if env.contains(var) {
            return Admission::Denied(format!("environment variable '{var}' is set"));
        }
    }

    for var in &condition.env_true {
        match env.get(var) {
            Some(value) if TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t)) => {}
            Some(value) => {
                return Admission::Denied(format!(
                    "environment variable '{var}' is '{value}', not truthy"
                ))
            }
            None => {
                return Admission::Denied(format!("environment variable '{var}' is not set"))
            }
        }
    }

    for (var, expected) in &condition.env_equals {
        match env.get(var) {
            Some(value) if value == expected => {}
            Some(value) => {
                return Admission::Denied(format!(
                    "environment variable '{var}' is '{value}', expected '{expected}'"
                ))
            }
            None => {
                return Admission::Denied(format!("environment variable '{var}' is not set"))
            }
        }
    }

    for file in &condition.files_exist {
        if !root.join(file).exists() {
            return Admission::Denied(format!("required file '{file}' does not exist"));
        }
    }

    for file in &condition.files_not_exist {
        if root.join(file).exists() {
            return Admission::Denied(format!("file '{file}' exists"));
        }
    }

    Admission::Admitted
}
