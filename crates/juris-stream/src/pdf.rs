use serde_json::{Value, json};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::PdfConfig;
use crate::errors::PdfError;

/// Formatting instructions sent with every generation request.
const FORMAT_INSTRUCTIONS: &str = "Mets en forme ce document juridique en PDF professionnel : \
titres hiérarchisés, paragraphes justifiés, numérotation des articles conservée, \
police serif lisible, marges standard A4, pied de page avec numéro de page. \
Ne modifie pas le contenu du texte.";

/// State of an upstream generation job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Queued or rendering.
    Pending,
    Complete { url: String },
    Failed { message: Option<String> },
}

impl JobStatus {
    /// Parses an upstream status body.
    ///
    /// A `complete` job without a URL is treated as still pending.
    pub fn from_value(value: &Value) -> Self {
        let status = value.get("status").and_then(Value::as_str).unwrap_or("");
        match status {
            "complete" | "completed" => ["pdf_url", "pdfUrl", "url"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
                .filter(|url| !url.trim().is_empty())
                .map(|url| Self::Complete {
                    url: url.to_string(),
                })
                .unwrap_or(Self::Pending),
            "failed" | "error" => Self::Failed {
                message: value
                    .get("error")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned),
            },
            _ => Self::Pending,
        }
    }
}

/// Upstream job API: submit once, then poll.
#[async_trait::async_trait]
pub trait PdfJobApi: Send + Sync {
    /// Submits `content` and returns the job id.
    async fn submit(&self, content: &str) -> Result<String, PdfError>;
    async fn status(&self, job_id: &str) -> Result<JobStatus, PdfError>;
}

/// A generated document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PdfDocument {
    pub url: String,
}

/// Proxy reply in the shape the front end expects.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PdfResponse {
    pub success: bool,
    #[serde(rename = "pdfUrl", skip_serializing_if = "Option::is_none", default)]
    pub pdf_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl PdfResponse {
    /// HTTP status to reply with, alongside the body.
    pub fn from_result(result: &Result<PdfDocument, PdfError>) -> (u16, Self) {
        match result {
            Ok(doc) => (
                200,
                Self {
                    success: true,
                    pdf_url: Some(doc.url.clone()),
                    error: None,
                },
            ),
            Err(err) => (
                err.http_status(),
                Self {
                    success: false,
                    pdf_url: None,
                    error: Some(err.to_string()),
                },
            ),
        }
    }
}

/// Generates a PDF for `content`: submit, then poll until the job settles or
/// `config.max_wait` runs out.
///
/// Poll failures are logged and retried on the next tick.
pub async fn generate_pdf(
    api: &dyn PdfJobApi,
    content: &str,
    config: &PdfConfig,
) -> Result<PdfDocument, PdfError> {
    if content.trim().is_empty() {
        return Err(PdfError::Validation("content must not be empty".into()));
    }

    let job_id = api.submit(content).await?;
    info!(job_id = %job_id, "pdf job submitted");

    let deadline = Instant::now() + config.max_wait;
    loop {
        sleep(config.poll_interval).await;
        if Instant::now() > deadline {
            warn!(job_id = %job_id, "pdf job timed out");
            return Err(PdfError::TimedOut);
        }
        match api.status(&job_id).await {
            Ok(JobStatus::Complete { url }) => {
                info!(job_id = %job_id, "pdf job complete");
                return Ok(PdfDocument { url });
            }
            Ok(JobStatus::Failed { message }) => {
                return Err(PdfError::JobFailed(
                    message.unwrap_or_else(|| "PDF generation failed".to_string()),
                ));
            }
            Ok(JobStatus::Pending) => {}
            Err(err) => debug!(job_id = %job_id, error = %err, "status poll failed; retrying"),
        }
    }
}

/// Job API over HTTP.
pub struct ReqwestPdfJobApi {
    client: reqwest::Client,
    config: PdfConfig,
}

impl ReqwestPdfJobApi {
    pub fn new(config: PdfConfig) -> Result<Self, PdfError> {
        if config.api_url.trim().is_empty() {
            return Err(PdfError::Config("api_url must not be empty".into()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| PdfError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PdfConfig {
        &self.config
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait::async_trait]
impl PdfJobApi for ReqwestPdfJobApi {
    async fn submit(&self, content: &str) -> Result<String, PdfError> {
        let req = self
            .client
            .post(self.config.generate_url())
            .json(&json!({"content": content, "instructions": FORMAT_INSTRUCTIONS}));
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| PdfError::Transport(e.to_string()))?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(PdfError::Submit {
                status: status.as_u16(),
                message: upstream_error(&body).unwrap_or_else(|| status.to_string()),
            });
        }
        let accepted = body.get("success").and_then(Value::as_bool).unwrap_or(true);
        match body.get("job_id").and_then(Value::as_str) {
            Some(job_id) if accepted && !job_id.is_empty() => Ok(job_id.to_string()),
            _ => Err(PdfError::Submit {
                status: 502,
                message: upstream_error(&body)
                    .unwrap_or_else(|| "upstream did not return a job id".to_string()),
            }),
        }
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, PdfError> {
        let req = self.client.get(self.config.status_url(job_id));
        let response = self
            .authorized(req)
            .send()
            .await
            .map_err(|e| PdfError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PdfError::Transport(format!("status poll returned {status}")));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| PdfError::Transport(e.to_string()))?;
        Ok(JobStatus::from_value(&body))
    }
}

fn upstream_error(body: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeJobApi {
        submit: Result<String, PdfError>,
        polls: Mutex<VecDeque<Result<JobStatus, PdfError>>>,
        submits: AtomicUsize,
        status_calls: AtomicUsize,
    }

    impl FakeJobApi {
        fn new(polls: Vec<Result<JobStatus, PdfError>>) -> Self {
            Self {
                submit: Ok("job-42".into()),
                polls: Mutex::new(polls.into()),
                submits: AtomicUsize::new(0),
                status_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PdfJobApi for FakeJobApi {
        async fn submit(&self, _content: &str) -> Result<String, PdfError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            self.submit.clone()
        }

        async fn status(&self, job_id: &str) -> Result<JobStatus, PdfError> {
            assert_eq!(job_id, "job-42");
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            self.polls
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Ok(JobStatus::Pending))
        }
    }

    fn config() -> PdfConfig {
        PdfConfig::new("https://pdf.test")
    }

    #[tokio::test(start_paused = true)]
    async fn completes_after_transient_poll_errors() {
        let api = FakeJobApi::new(vec![
            Ok(JobStatus::Pending),
            Err(PdfError::Transport("503".into())),
            Ok(JobStatus::Complete {
                url: "https://cdn.test/doc.pdf".into(),
            }),
        ]);
        let started = Instant::now();
        let doc = generate_pdf(&api, "Contrat de bail", &config())
            .await
            .expect("pdf");
        assert_eq!(doc.url, "https://cdn.test/doc.pdf");
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_gateway_timeout_status() {
        let api = FakeJobApi::new(Vec::new());
        let result = generate_pdf(&api, "Contrat", &config()).await;
        assert!(matches!(result, Err(PdfError::TimedOut)));
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 60);

        let (status, body) = PdfResponse::from_result(&result);
        assert_eq!(status, 504);
        assert!(!body.success);
        assert!(body.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_job_is_reported() {
        let api = FakeJobApi::new(vec![Ok(JobStatus::Failed {
            message: Some("template error".into()),
        })]);
        let result = generate_pdf(&api, "Contrat", &config()).await;
        assert_eq!(result, Err(PdfError::JobFailed("template error".into())));
    }

    #[tokio::test]
    async fn empty_content_never_reaches_upstream() {
        let api = FakeJobApi::new(Vec::new());
        let result = generate_pdf(&api, "   ", &config()).await;
        assert!(matches!(result, Err(PdfError::Validation(_))));
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
        assert_eq!(PdfResponse::from_result(&result).0, 400);
    }

    #[tokio::test]
    async fn submit_failure_keeps_upstream_status() {
        let mut api = FakeJobApi::new(Vec::new());
        api.submit = Err(PdfError::Submit {
            status: 429,
            message: "quota".into(),
        });
        let result = generate_pdf(&api, "Contrat", &config()).await;
        assert_eq!(PdfResponse::from_result(&result).0, 429);
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn job_status_parsing() {
        assert_eq!(
            JobStatus::from_value(&json!({"status": "complete", "pdf_url": "u"})),
            JobStatus::Complete { url: "u".into() }
        );
        assert_eq!(
            JobStatus::from_value(&json!({"status": "complete"})),
            JobStatus::Pending
        );
        assert_eq!(
            JobStatus::from_value(&json!({"status": "processing"})),
            JobStatus::Pending
        );
        assert_eq!(
            JobStatus::from_value(&json!({"status": "failed"})),
            JobStatus::Failed { message: None }
        );
    }

    #[test]
    fn response_serializes_with_camel_case_url() {
        let (status, body) = PdfResponse::from_result(&Ok(PdfDocument { url: "u".into() }));
        assert_eq!(status, 200);
        assert_eq!(
            serde_json::to_value(&body).expect("json"),
            json!({"success": true, "pdfUrl": "u"})
        );
    }
}
