use std::fs::File;
use std::io::{self, Read};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ResolvedConfig;
use crate::domain::{
    CancerType, Experiment, ExperimentId, ExperimentStatus, LayerType, StagedFile,
    parse_timestamp,
};
use crate::error::SynomixError;

// `layer_type` is what the service stored, which differs from the request
// when it auto-detected the layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub layer_type: LayerType,
    #[serde(alias = "genes")]
    pub gene_count: u64,
    #[serde(alias = "samples")]
    pub sample_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSummary {
    pub total_layers: Option<u64>,
    pub multi_omics_hits: Option<u64>,
    pub actionable_targets: Option<u64>,
    pub pathways_enriched: Option<u64>,
    pub predicted_subtype: Option<String>,
    pub immune_score: Option<f64>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisAccepted {
    pub experiment_id: ExperimentId,
    pub status: Option<String>,
    pub summary: Option<AnalysisSummary>,
    pub layers_analyzed: Vec<String>,
    pub processing_time: Option<f64>,
    pub body: serde_json::Value,
}

impl AnalysisAccepted {
    // The analyze response is loosely typed; unknown or malformed parts stay in `body`.
    pub fn from_body(experiment: &ExperimentId, body: serde_json::Value) -> Self {
        let status = body
            .get("status")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .or_else(|| {
                body.get("success")
                    .and_then(|value| value.as_bool())
                    .map(|ok| (if ok { "success" } else { "failed" }).to_string())
            });
        let summary = body
            .get("summary")
            .and_then(|value| serde_json::from_value(value.clone()).ok());
        let layers_analyzed = body
            .get("layers_analyzed")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_default();
        let processing_time = body.get("processing_time").and_then(|value| value.as_f64());
        Self {
            experiment_id: experiment.clone(),
            status,
            summary,
            layers_analyzed,
            processing_time,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub id: ExperimentId,
    pub name: Option<String>,
    pub cancer_type: Option<CancerType>,
    pub created_at: Option<DateTime<Utc>>,
    pub status: Option<ExperimentStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub share_url: String,
}

pub trait AnalysisClient: Send + Sync {
    fn create_experiment(
        &self,
        name: &str,
        cancer_type: CancerType,
    ) -> Result<Experiment, SynomixError>;

    // `progress` values are not guaranteed to be monotonic or bounded.
    fn upload_layer(
        &self,
        experiment: &ExperimentId,
        file: &StagedFile,
        layer_type: Option<LayerType>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<UploadReceipt, SynomixError>;

    fn trigger_analysis(&self, experiment: &ExperimentId)
    -> Result<AnalysisAccepted, SynomixError>;
}

pub trait ExperimentCatalog: Send + Sync {
    fn list_experiments(&self) -> Result<Vec<ExperimentSummary>, SynomixError>;
    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, SynomixError>;
    fn share_experiment(&self, id: &ExperimentId) -> Result<ShareLink, SynomixError>;
}

#[derive(Clone)]
pub struct AnalysisHttpClient {
    client: Client,
    base_url: String,
}

impl AnalysisHttpClient {
    pub fn new(config: &ResolvedConfig) -> Result<Self, SynomixError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("synomix/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SynomixError::Http(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(SynomixError::from_reqwest)?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn check(response: Response) -> Result<Response, SynomixError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Err(SynomixError::Status {
            status,
            message: error_message(&body),
        })
    }

    fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SynomixError> {
        let response = Self::check(response)?;
        let text = response.text().map_err(SynomixError::from_reqwest)?;
        serde_json::from_str(&text).map_err(|err| SynomixError::Decode(err.to_string()))
    }
}

impl AnalysisClient for AnalysisHttpClient {
    fn create_experiment(
        &self,
        name: &str,
        cancer_type: CancerType,
    ) -> Result<Experiment, SynomixError> {
        let url = self.url("/api/experiment/create");
        debug!(%url, name, %cancer_type, "creating experiment");
        let form = Form::new()
            .text("name", name.to_string())
            .text("cancer_type", cancer_type.as_str());
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(SynomixError::from_reqwest)?;
        let payload: ExperimentPayload = Self::read_json(response)?;
        payload.into_experiment(Some(name), Some(cancer_type))
    }

    fn upload_layer(
        &self,
        experiment: &ExperimentId,
        file: &StagedFile,
        layer_type: Option<LayerType>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<UploadReceipt, SynomixError> {
        let url = self.url(&format!("/api/experiment/{}/upload", experiment.as_str()));
        debug!(%url, file = %file.name, size = file.size, "uploading layer");

        let handle = File::open(file.path.as_std_path())
            .map_err(|err| SynomixError::Filesystem(format!("{}: {err}", file.path)))?;
        let (tx, rx) = mpsc::channel::<u64>();
        let reader = CountingReader {
            inner: handle,
            sent: 0,
            tx,
        };
        let part = Part::reader_with_length(reader, file.size)
            .file_name(file.name.clone())
            .mime_str(file.kind.mime())
            .map_err(SynomixError::from_reqwest)?;
        let mut form = Form::new().part("file", part);
        if let Some(layer) = layer_type {
            form = form.text("layer_type", layer.as_str());
        }
        let request = self.client.post(&url).multipart(form);

        // The body is read on reqwest's worker; byte counts come back over the
        // channel so `progress` only ever runs on this thread.
        let total = file.size;
        let outcome = thread::scope(|scope| {
            let worker = scope.spawn(move || request.send());
            loop {
                match rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(sent) => progress(percent_of(sent, total)),
                    Err(RecvTimeoutError::Timeout) => {
                        if worker.is_finished() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            for sent in rx.try_iter() {
                progress(percent_of(sent, total));
            }
            worker.join()
        });

        let response = match outcome {
            Ok(result) => result.map_err(SynomixError::from_reqwest)?,
            Err(_) => return Err(SynomixError::Http("upload worker panicked".to_string())),
        };
        Self::read_json(response)
    }

    fn trigger_analysis(
        &self,
        experiment: &ExperimentId,
    ) -> Result<AnalysisAccepted, SynomixError> {
        let url = self.url(&format!("/api/experiment/{}/analyze", experiment.as_str()));
        debug!(%url, "triggering analysis");
        let response = self
            .client
            .post(&url)
            .send()
            .map_err(SynomixError::from_reqwest)?;
        let body: serde_json::Value = Self::read_json(response)?;
        Ok(AnalysisAccepted::from_body(experiment, body))
    }
}

impl ExperimentCatalog for AnalysisHttpClient {
    fn list_experiments(&self) -> Result<Vec<ExperimentSummary>, SynomixError> {
        let response = self
            .client
            .get(self.url("/api/experiments"))
            .send()
            .map_err(SynomixError::from_reqwest)?;
        let payload: ExperimentListPayload = Self::read_json(response)?;
        payload.into_summaries()
    }

    fn get_experiment(&self, id: &ExperimentId) -> Result<Experiment, SynomixError> {
        let response = self
            .client
            .get(self.url(&format!("/api/experiment/{}", id.as_str())))
            .send()
            .map_err(SynomixError::from_reqwest)?;
        let payload: ExperimentPayload = Self::read_json(response)?;
        payload.into_experiment(None, None)
    }

    fn share_experiment(&self, id: &ExperimentId) -> Result<ShareLink, SynomixError> {
        let response = self
            .client
            .post(self.url(&format!("/api/experiment/{}/share", id.as_str())))
            .send()
            .map_err(SynomixError::from_reqwest)?;
        Self::read_json(response)
    }
}

struct CountingReader<R> {
    inner: R,
    sent: u64,
    tx: mpsc::Sender<u64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.sent += read as u64;
            let _ = self.tx.send(self.sent);
        }
        Ok(read)
    }
}

fn percent_of(sent: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (sent as f64 * 100.0 / total as f64).round()
}

pub fn error_message(body: &str) -> String {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        match value.get("detail") {
            Some(serde_json::Value::String(detail)) => return detail.clone(),
            Some(other) => return other.to_string(),
            None => {}
        }
    }
    if trimmed.is_empty() {
        "request failed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentPayload {
    #[serde(alias = "experiment_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cancer_type: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    is_public: bool,
    #[serde(default)]
    share_token: Option<String>,
    #[serde(default)]
    status: Option<ExperimentStatus>,
}

impl ExperimentPayload {
    // Some service builds only echo the id on create.
    fn into_experiment(
        self,
        fallback_name: Option<&str>,
        fallback_cancer_type: Option<CancerType>,
    ) -> Result<Experiment, SynomixError> {
        let id: ExperimentId = self.id.parse()?;
        let name = self
            .name
            .or_else(|| fallback_name.map(str::to_string))
            .ok_or_else(|| SynomixError::Decode(format!("experiment {id} has no name")))?;
        let cancer_type = match self.cancer_type {
            Some(value) => value.parse()?,
            None => fallback_cancer_type.ok_or_else(|| {
                SynomixError::Decode(format!("experiment {id} has no cancer type"))
            })?,
        };
        Ok(Experiment {
            id,
            name,
            cancer_type,
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
            updated_at: self.updated_at.as_deref().and_then(parse_timestamp),
            user_id: self.user_id,
            is_public: self.is_public,
            share_token: self.share_token,
            status: self.status,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ExperimentSummaryPayload {
    #[serde(alias = "experiment_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cancer_type: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    status: Option<ExperimentStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExperimentListPayload {
    Detailed(Vec<ExperimentSummaryPayload>),
    Ids { experiments: Vec<String> },
}

impl ExperimentListPayload {
    fn into_summaries(self) -> Result<Vec<ExperimentSummary>, SynomixError> {
        match self {
            ExperimentListPayload::Detailed(entries) => entries
                .into_iter()
                .map(|entry| {
                    Ok(ExperimentSummary {
                        id: entry.id.parse()?,
                        name: entry.name,
                        cancer_type: entry.cancer_type.and_then(|value| value.parse().ok()),
                        created_at: entry.created_at.as_deref().and_then(parse_timestamp),
                        status: entry.status,
                    })
                })
                .collect(),
            ExperimentListPayload::Ids { experiments } => experiments
                .into_iter()
                .map(|id| {
                    Ok(ExperimentSummary {
                        id: id.parse()?,
                        name: None,
                        cancer_type: None,
                        created_at: None,
                        status: None,
                    })
                })
                .collect(),
        }
    }
}
