// ABOUTME: Validated project name, the top-level namespace for a managed application.
// ABOUTME: Same character rules as ServiceName; kept as a distinct type so the two are never confused.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectNameError {
    #[error("project name cannot be empty")]
    Empty,

    #[error("project name exceeds maximum length of 63 characters")]
    TooLong,

    #[error("project name cannot start with a hyphen")]
    StartsWithHyphen,

    #[error("project name cannot end with a hyphen")]
    EndsWithHyphen,

    #[error("project name must be lowercase")]
    NotLowercase,

    #[error("invalid character in project name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectName(String);

impl ProjectName {
    pub fn new(value: &str) -> Result<Self, ProjectNameError> {
        if value.is_empty() {
            return Err(ProjectNameError::Empty);
        }

        if value.len() > 63 {
            return Err(ProjectNameError::TooLong);
        }

        if value.starts_with('-') {
            return Err(ProjectNameError::StartsWithHyphen);
        }

        if value.ends_with('-') {
            return Err(ProjectNameError::EndsWithHyphen);
        }

        for c in value.chars() {
            if c.is_ascii_uppercase() {
                return Err(ProjectNameError::NotLowercase);
            }
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
                return Err(ProjectNameError::InvalidChar(c));
            }
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_uppercase() {
        assert!(matches!(
            ProjectName::new("MyApp"),
            Err(ProjectNameError::NotLowercase)
        ));
    }

    #[test]
    fn accepts_hyphenated_lowercase() {
        assert_eq!(ProjectName::new("my-app").unwrap().as_str(), "my-app");
    }
}
