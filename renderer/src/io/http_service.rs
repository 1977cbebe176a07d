//! Blocking HTTP client for the generation service.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::error::ServiceError;
use crate::core::types::{ConformanceTestSummary, FileChanges};
use crate::io::config::ServiceConfig;
use crate::io::service::{
    AcceptanceTestRequest, AmbiguityAnalysis, AmbiguityRequest, ConformanceMemoryRequest,
    ConformanceTestFix, ConformanceTestsRequest, FixConformanceTestRequest,
    FixUnitTestsRequest, FolderNameRequest, FrStatusRequest, FunctionalRequirementRequest,
    GenerationService, RefactorRequest, RenderedConformanceTests, RequestMeta, SummarizeRequest,
};

/// Exponential backoff: attempt `n` (1-based) waits `base_delay * 2^(n-1)` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or attempts run out.
    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() || attempt >= self.max_attempts => {
                    return Err(err);
                }
                Err(err) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        err = %err,
                        "generation request failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    #[serde(flatten)]
    meta: &'a RequestMeta,
    #[serde(flatten)]
    request: &'a T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    proposed_breakdown: Option<Value>,
}

#[derive(Deserialize)]
struct FilesResponse {
    files: FileChanges,
}

#[derive(Deserialize)]
struct FolderNameResponse {
    folder_name: String,
}

#[derive(Deserialize)]
struct SummaryResponse {
    summary: Vec<ConformanceTestSummary>,
}

#[derive(Deserialize)]
struct AmbiguityResponse {
    #[serde(default)]
    analysis: Option<AmbiguityAnalysis>,
}

#[derive(Debug, Clone)]
pub struct HttpGenerationService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpGenerationService {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build generation service client")?;
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            retry: RetryPolicy {
                max_attempts: config.retry_attempts,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
            },
        })
    }

    #[instrument(skip_all, fields(endpoint = %endpoint, call_index = meta.call_index))]
    fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        meta: &RequestMeta,
        request: &Req,
    ) -> Result<Resp, ServiceError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let body = Envelope { meta, request };
        self.retry.run(endpoint, || self.post_once(&url, &body))
    }

    fn post_once<B: Serialize, Resp: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<Resp, ServiceError> {
        let mut builder = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| ServiceError::Transport(err.to_string()))?;
        debug!(status = status.as_u16(), bytes = text.len(), "generation response");
        if status.is_success() {
            return serde_json::from_str(&text).map_err(|err| ServiceError::Decode(err.to_string()));
        }
        Err(error_from_body(status.as_u16(), &text))
    }
}

/// Map an error response onto the service error taxonomy.
fn error_from_body(status: u16, text: &str) -> ServiceError {
    let Ok(body) = serde_json::from_str::<ErrorBody>(text) else {
        return ServiceError::Http {
            status,
            message: text.trim().to_string(),
        };
    };
    let message = body.message.unwrap_or_else(|| text.trim().to_string());
    match body.error_code.as_deref() {
        Some("FunctionalRequirementTooComplex") => ServiceError::TooComplex {
            message,
            proposed_breakdown: breakdown_parts(body.proposed_breakdown),
        },
        Some("ConflictingRequirements") => ServiceError::ConflictingRequirements(message),
        Some("CreditBalanceTooLow") => ServiceError::CreditBalanceTooLow(message),
        Some("MissingResource") => ServiceError::MissingResource(message),
        Some("PlainSyntaxError") => ServiceError::PlainSyntaxError(message),
        Some("BadRequest") => ServiceError::BadRequest(message),
        Some("InternalServerError" | "LLMInternalError") => {
            ServiceError::InternalServerError(message)
        }
        _ => ServiceError::Http { status, message },
    }
}

/// The breakdown arrives either as a list or as a numbered object.
fn breakdown_parts(value: Option<Value>) -> Vec<String> {
    let to_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    match value {
        Some(Value::Array(items)) => items.iter().map(to_text).collect(),
        Some(Value::Object(map)) => map.values().map(to_text).collect(),
        Some(Value::String(s)) => vec![s],
        _ => Vec::new(),
    }
}

impl GenerationService for HttpGenerationService {
    fn render_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FunctionalRequirementRequest,
    ) -> Result<FileChanges, ServiceError> {
        let resp: FilesResponse = self.post("render_functional_requirement", meta, request)?;
        Ok(resp.files)
    }

    fn fix_unit_tests(
        &self,
        meta: &RequestMeta,
        request: &FixUnitTestsRequest,
    ) -> Result<FileChanges, ServiceError> {
        let resp: FilesResponse = self.post("fix_unittests_issue", meta, request)?;
        Ok(resp.files)
    }

    fn refactor(
        &self,
        meta: &RequestMeta,
        request: &RefactorRequest,
    ) -> Result<FileChanges, ServiceError> {
        let resp: FilesResponse = self.post("refactor_source_files_if_needed", meta, request)?;
        Ok(resp.files)
    }

    fn generate_folder_name(
        &self,
        meta: &RequestMeta,
        request: &FolderNameRequest,
    ) -> Result<String, ServiceError> {
        let resp: FolderNameResponse = self.post(
            "generate_folder_name_from_functional_requirement",
            meta,
            request,
        )?;
        Ok(resp.folder_name)
    }

    fn render_conformance_tests(
        &self,
        meta: &RequestMeta,
        request: &ConformanceTestsRequest,
    ) -> Result<RenderedConformanceTests, ServiceError> {
        self.post("render_conformance_tests", meta, request)
    }

    fn render_acceptance_test(
        &self,
        meta: &RequestMeta,
        request: &AcceptanceTestRequest,
    ) -> Result<FileChanges, ServiceError> {
        let resp: FilesResponse = self.post("render_acceptance_tests", meta, request)?;
        Ok(resp.files)
    }

    fn fix_conformance_test(
        &self,
        meta: &RequestMeta,
        request: &FixConformanceTestRequest,
    ) -> Result<ConformanceTestFix, ServiceError> {
        self.post("fix_conformance_tests_issue", meta, request)
    }

    fn create_conformance_test_memory(
        &self,
        meta: &RequestMeta,
        request: &ConformanceMemoryRequest,
    ) -> Result<FileChanges, ServiceError> {
        let resp: FilesResponse = self.post("create_conformance_test_memory", meta, request)?;
        Ok(resp.files)
    }

    fn summarize_conformance_tests(
        &self,
        meta: &RequestMeta,
        request: &SummarizeRequest,
    ) -> Result<Vec<ConformanceTestSummary>, ServiceError> {
        let resp: SummaryResponse =
            self.post("summarize_finished_conformance_tests", meta, request)?;
        Ok(resp.summary)
    }

    fn analyze_ambiguity(
        &self,
        meta: &RequestMeta,
        request: &AmbiguityRequest,
    ) -> Result<Option<AmbiguityAnalysis>, ServiceError> {
        let resp: AmbiguityResponse = self.post("analyze_rendering", meta, request)?;
        Ok(resp.analysis)
    }

    fn finish_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FrStatusRequest,
    ) -> Result<(), ServiceError> {
        let _: Value = self.post("finish_functional_requirement", meta, request)?;
        Ok(())
    }

    fn fail_functional_requirement(
        &self,
        meta: &RequestMeta,
        request: &FrStatusRequest,
    ) -> Result<(), ServiceError> {
        let _: Value = self.post("fail_functional_requirement", meta, request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn retries_transient_errors_up_to_the_limit() {
        let mut calls = 0;
        let result: Result<(), ServiceError> = instant().run("op", || {
            calls += 1;
            Err(ServiceError::Transport("reset".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn recovers_after_transient_error() {
        let mut calls = 0;
        let result = instant().run("op", || {
            calls += 1;
            if calls < 3 {
                Err(ServiceError::Http {
                    status: 503,
                    message: "busy".into(),
                })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result, Ok(3));
    }

    #[test]
    fn no_retry_errors_surface_immediately() {
        let mut calls = 0;
        let result: Result<(), ServiceError> = instant().run("op", || {
            calls += 1;
            Err(ServiceError::InternalServerError("oops".into()))
        });
        assert_eq!(result, Err(ServiceError::InternalServerError("oops".into())));
        assert_eq!(calls, 1);
    }

    #[test]
    fn maps_error_bodies() {
        let too_complex = error_from_body(
            422,
            r#"{"error_code": "FunctionalRequirementTooComplex", "message": "split",
                "proposed_breakdown": {"1": "first", "2": "second"}}"#,
        );
        assert_eq!(
            too_complex,
            ServiceError::TooComplex {
                message: "split".into(),
                proposed_breakdown: vec!["first".into(), "second".into()],
            }
        );
        assert_eq!(
            error_from_body(402, r#"{"error_code": "CreditBalanceTooLow", "message": "top up"}"#),
            ServiceError::CreditBalanceTooLow("top up".into())
        );
        assert_eq!(
            error_from_body(502, "<html>bad gateway</html>"),
            ServiceError::Http {
                status: 502,
                message: "<html>bad gateway</html>".into()
            }
        );
    }

    #[test]
    fn envelope_flattens_meta_into_request() {
        let meta = RequestMeta {
            render_id: "r".into(),
            call_index: 7,
            unittest_batch_id: 2,
        };
        let request = FrStatusRequest {
            frid: "1.2".parse().expect("frid"),
        };
        let json = serde_json::to_value(Envelope {
            meta: &meta,
            request: &request,
        })
        .expect("json");
        assert_eq!(json["render_id"], "r");
        assert_eq!(json["call_index"], 7);
        assert_eq!(json["frid"], "1.2");
    }
}
