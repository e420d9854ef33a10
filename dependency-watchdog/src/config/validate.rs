//! Multi-error config validation (spec §7: "config errors... terminate the
//! process with a multi-error describing every violation"). Every `check_*`
//! free function below pushes onto a shared `Vec<String>` instead of
//! short-circuiting on the first problem, then `ConfigError::from_violations`
//! turns the accumulated list into a single error the caller can print and
//! exit on.

use std::fmt;

#[derive(Debug)]
pub struct ConfigError {
    pub violations: Vec<String>,
}

impl ConfigError {
    pub fn from_violations(violations: Vec<String>) -> Result<(), ConfigError> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConfigError { violations })
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "configuration is invalid ({} violation(s)):", self.violations.len())?;
        for violation in &self.violations {
            writeln!(f, "  - {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigError {}

pub(crate) fn require_non_empty(violations: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        violations.push(format!("{field} must not be empty"));
    }
}

pub(crate) fn require_non_zero_duration(
    violations: &mut Vec<String>,
    field: &str,
    value: std::time::Duration,
) {
    if value.is_zero() {
        violations.push(format!("{field} must be greater than zero"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_violations_is_ok() {
        assert!(ConfigError::from_violations(vec![]).is_ok());
    }

    #[test]
    fn violations_are_preserved_in_order() {
        let err = ConfigError::from_violations(vec!["a".into(), "b".into()]).unwrap_err();
        assert_eq!(err.violations, vec!["a".to_string(), "b".to_string()]);
        let rendered = err.to_string();
        assert!(rendered.contains("a"));
        assert!(rendered.contains("b"));
    }
}
