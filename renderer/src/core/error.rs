//! Error records carried out of actions into the fatal-state handler.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::frid::Frid;

const FALLBACK_MESSAGE: &str = "Rendering failed";

/// Classification of a fatal render failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The functional requirement is too large to implement in one step.
    Complexity,
    /// The specification contains requirements that contradict each other.
    Conflicting,
    /// A script or the local environment is broken.
    Environment,
    /// The specification itself is malformed.
    Specification,
    /// The generation service rejected the request or could not be reached.
    Service,
    /// A bounded retry counter ran out.
    LimitExceeded,
    Cancelled,
    Internal,
}

/// Structured failure record. Serializable so it can travel in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct RenderError {
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frid: Option<Frid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_breakdown: Option<Vec<String>>,
}

impl RenderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            exit_code: None,
            script: None,
            frid: None,
            proposed_breakdown: None,
        }
    }

    pub fn environment(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Environment, message)
    }

    pub fn limit_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::LimitExceeded, message)
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = Some(exit_code);
        self
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_frid(mut self, frid: Frid) -> Self {
        self.frid = Some(frid);
        self
    }

    pub fn with_breakdown(mut self, breakdown: Vec<String>) -> Self {
        if !breakdown.is_empty() {
            self.proposed_breakdown = Some(breakdown);
        }
        self
    }

    /// Message followed by a `Details:` block for every optional field present.
    pub fn format_for_display(&self) -> String {
        let mut details = Vec::new();
        if let Some(frid) = &self.frid {
            details.push(format!("  functional requirement: {frid}"));
        }
        if let Some(script) = &self.script {
            details.push(format!("  script: {script}"));
        }
        if let Some(code) = self.exit_code {
            details.push(format!("  exit code: {code}"));
        }
        if let Some(breakdown) = &self.proposed_breakdown {
            details.push("  proposed breakdown:".to_string());
            for (idx, part) in breakdown.iter().enumerate() {
                details.push(format!("    {}. {part}", idx + 1));
            }
        }

        if details.is_empty() {
            return self.message.clone();
        }
        format!("{}\nDetails:\n{}", self.message, details.join("\n"))
    }

    /// Recover a render error from an arbitrary failure chain.
    pub fn from_failure(err: &anyhow::Error) -> Self {
        if let Some(render) = err.downcast_ref::<RenderError>() {
            return render.clone();
        }
        if let Some(service) = err.downcast_ref::<ServiceError>() {
            return Self::from(service);
        }
        Self::new(ErrorKind::Internal, format!("{err:#}"))
    }
}

/// Message to show for an optional error.
pub fn display_message(err: Option<&RenderError>) -> String {
    match err {
        Some(err) if !err.message.trim().is_empty() => err.format_for_display(),
        _ => FALLBACK_MESSAGE.to_string(),
    }
}

/// Failure reported by the generation service or its transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("functional requirement is too complex: {message}")]
    TooComplex {
        message: String,
        proposed_breakdown: Vec<String>,
    },
    #[error("conflicting requirements: {0}")]
    ConflictingRequirements(String),
    #[error("credit balance too low: {0}")]
    CreditBalanceTooLow(String),
    #[error("missing resource: {0}")]
    MissingResource(String),
    #[error("specification syntax error: {0}")]
    PlainSyntaxError(String),
    #[error("malformed request: {0}")]
    BadRequest(String),
    #[error("generation service internal error: {0}")]
    InternalServerError(String),
    #[error("generation service returned HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("generation service unreachable: {0}")]
    Transport(String),
    #[error("unexpected generation service response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Errors outside the fixed no-retry set may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ServiceError::TooComplex { .. }
                | ServiceError::ConflictingRequirements(_)
                | ServiceError::CreditBalanceTooLow(_)
                | ServiceError::MissingResource(_)
                | ServiceError::PlainSyntaxError(_)
                | ServiceError::BadRequest(_)
                | ServiceError::InternalServerError(_)
        )
    }
}

impl From<&ServiceError> for RenderError {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::TooComplex {
                message,
                proposed_breakdown,
            } => RenderError::new(ErrorKind::Complexity, message.clone())
                .with_breakdown(proposed_breakdown.clone()),
            ServiceError::ConflictingRequirements(message) => {
                RenderError::new(ErrorKind::Conflicting, message.clone())
            }
            ServiceError::PlainSyntaxError(message) => {
                RenderError::new(ErrorKind::Specification, message.clone())
            }
            other => RenderError::new(ErrorKind::Service, other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn display_lists_present_details() {
        let err = RenderError::environment("unit tests could not start")
            .with_script("run_tests.sh")
            .with_exit_code(69)
            .with_frid("2.1".parse().expect("frid"));
        let text = err.format_for_display();
        assert!(text.starts_with("unit tests could not start\nDetails:\n"));
        assert!(text.contains("functional requirement: 2.1"));
        assert!(text.contains("script: run_tests.sh"));
        assert!(text.contains("exit code: 69"));
    }

    #[test]
    fn display_without_details_is_message_only() {
        let err = RenderError::new(ErrorKind::Internal, "boom");
        assert_eq!(err.format_for_display(), "boom");
        assert_eq!(display_message(None), "Rendering failed");
        let blank = RenderError::new(ErrorKind::Internal, "  ");
        assert_eq!(display_message(Some(&blank)), "Rendering failed");
    }

    #[test]
    fn no_retry_set_is_fixed() {
        assert!(!ServiceError::InternalServerError("x".into()).is_retryable());
        assert!(!ServiceError::CreditBalanceTooLow("x".into()).is_retryable());
        assert!(ServiceError::Transport("reset".into()).is_retryable());
        assert!(
            ServiceError::Http {
                status: 503,
                message: "busy".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn from_failure_recovers_typed_errors_through_context() {
        let too_complex = ServiceError::TooComplex {
            message: "split it".into(),
            proposed_breakdown: vec!["part one".into(), "part two".into()],
        };
        let err = Err::<(), _>(too_complex)
            .context("render functional requirement")
            .expect_err("error");
        let render = RenderError::from_failure(&err);
        assert_eq!(render.kind, ErrorKind::Complexity);
        assert_eq!(render.proposed_breakdown.as_ref().map(Vec::len), Some(2));

        let plain = anyhow::anyhow!("disk full").context("write build file");
        let render = RenderError::from_failure(&plain);
        assert_eq!(render.kind, ErrorKind::Internal);
        assert!(render.message.contains("disk full"));
    }

    #[test]
    fn serializes_without_absent_fields() {
        let err = RenderError::new(ErrorKind::Conflicting, "a vs b");
        let json = serde_json::to_value(&err).expect("json");
        assert_eq!(json["kind"], "conflicting");
        assert!(json.get("exit_code").is_none());
    }
}
