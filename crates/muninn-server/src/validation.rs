// crates/muninn-server/src/validation.rs
// Input validation for every write surface.
//
// One validator owns the rules: shell-dangerous strings are rejected
// outright, paths are checked for traversal after one URL decode (catches
// %2e%2e), lengths are capped, and categorical fields parse into enums.
// Action-oriented requests deserialize as tagged unions so an invalid
// action never reaches a handler.

use serde::{Deserialize, Serialize};

use crate::error::{MuninnError, Result};

pub const MAX_PATH_LEN: usize = 500;
pub const MAX_TEXT_LEN: usize = 1000;
pub const MAX_CONTENT_LEN: usize = 10_000;

/// Characters that could escape into a shell if an output surface is ever
/// careless. Rejected in every validated string.
const SHELL_DANGEROUS: [char; 11] = ['`', '$', '(', ')', '{', '}', '|', ';', '&', '<', '>'];

fn invalid(field: &str, message: &str) -> MuninnError {
    MuninnError::InvalidInput(format!("{field}: {message}"))
}

/// Reject shell-dangerous characters and backslashes.
pub fn validate_safe_string(field: &str, value: &str) -> Result<()> {
    if let Some(bad) = value
        .chars()
        .find(|c| SHELL_DANGEROUS.contains(c) || *c == '\\')
    {
        return Err(invalid(field, &format!("contains forbidden character {bad:?}")));
    }
    Ok(())
}

/// General text field: safe string within the given cap.
pub fn validate_text(field: &str, value: &str, max_len: usize) -> Result<()> {
    if value.len() > max_len {
        return Err(invalid(
            field,
            &format!("length {} exceeds cap {max_len}", value.len()),
        ));
    }
    validate_safe_string(field, value)
}

/// Path field: decoded once before the traversal check so %2e%2e does not
/// slip through, then the usual safety and length rules.
pub fn validate_path(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if value.len() > MAX_PATH_LEN {
        return Err(invalid(
            field,
            &format!("length {} exceeds cap {MAX_PATH_LEN}", value.len()),
        ));
    }
    let decoded = urlencoding::decode(value)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| value.to_string());
    if decoded.contains("..") {
        return Err(invalid(field, "path traversal is not allowed"));
    }
    validate_safe_string(field, &decoded)
}

/// Issue classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Bug,
    Regression,
    Performance,
    Security,
    TechDebt,
}

/// Learning classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    Pattern,
    Gotcha,
    Preference,
    Convention,
    Architecture,
}

/// Terminal decision outcomes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::EnumString, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Success,
    Failed,
    Revised,
    Reverted,
}

/// Parse a categorical field, reporting the allowed values on failure.
pub fn parse_enum<T: std::str::FromStr>(field: &str, value: &str, allowed: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| invalid(field, &format!("must be one of: {allowed}")))
}

/// The issue verb's discriminated request union.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum IssueRequest {
    Add {
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        issue_type: Option<String>,
        #[serde(default)]
        severity: Option<i64>,
        #[serde(default)]
        workaround: Option<String>,
    },
    Resolve {
        id: i64,
        resolution: String,
    },
}

impl IssueRequest {
    pub fn validate(&self) -> Result<()> {
        match self {
            IssueRequest::Add {
                title,
                description,
                issue_type,
                severity,
                workaround,
            } => {
                validate_text("issue.title", title, MAX_TEXT_LEN)?;
                validate_text("issue.description", description, MAX_CONTENT_LEN)?;
                if let Some(raw) = issue_type {
                    parse_enum::<IssueType>(
                        "issue.issue_type",
                        raw,
                        "bug, regression, performance, security, tech_debt",
                    )?;
                }
                if let Some(severity) = severity
                    && !(1..=10).contains(severity)
                {
                    return Err(invalid("issue.severity", "must be between 1 and 10"));
                }
                if let Some(workaround) = workaround {
                    validate_text("issue.workaround", workaround, MAX_CONTENT_LEN)?;
                }
                Ok(())
            }
            IssueRequest::Resolve { id, resolution } => {
                if *id <= 0 {
                    return Err(invalid("issue.id", "must be a positive id"));
                }
                validate_text("issue.resolution", resolution, MAX_CONTENT_LEN)
            }
        }
    }
}

/// The session verb's discriminated request union.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SessionRequest {
    Start {
        #[serde(default)]
        goal: Option<String>,
    },
    End {
        id: i64,
        #[serde(default)]
        outcome: Option<String>,
        #[serde(default)]
        success: Option<i64>,
        #[serde(default)]
        files: Vec<String>,
    },
}

impl SessionRequest {
    pub fn validate(&self) -> Result<()> {
        match self {
            SessionRequest::Start { goal } => {
                if let Some(goal) = goal {
                    validate_text("session.goal", goal, MAX_TEXT_LEN)?;
                }
                Ok(())
            }
            SessionRequest::End {
                id,
                outcome,
                success,
                files,
            } => {
                if *id <= 0 {
                    return Err(invalid("session.id", "must be a positive id"));
                }
                if let Some(outcome) = outcome {
                    validate_text("session.outcome", outcome, MAX_TEXT_LEN)?;
                }
                if let Some(success) = success
                    && !(0..=2).contains(success)
                {
                    return Err(invalid("session.success", "must be 0, 1, or 2"));
                }
                for file in files {
                    validate_path("session.files", file)?;
                }
                Ok(())
            }
        }
    }
}
