use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::session::WizardPhase;

#[derive(Debug, Error, Diagnostic)]
pub enum SynomixError {
    #[error("invalid cancer type: {0}")]
    #[diagnostic(help(
        "expected one of: breast, lung, colorectal, prostate, ovarian, melanoma, glioma, pancreatic, liver, gastric"
    ))]
    InvalidCancerType(String),

    #[error("invalid layer type: {0}")]
    #[diagnostic(help(
        "expected one of: expression, mutation, methylation, cnv, protein, metabolomics, single_cell"
    ))]
    InvalidLayerType(String),

    #[error("invalid experiment id: {0}")]
    InvalidExperimentId(String),

    #[error("unsupported file {0}")]
    #[diagnostic(help("supported: .csv, .tsv, .txt, .gz"))]
    UnsupportedFile(String),

    #[error("experiment name and cancer type are required")]
    SetupIncomplete,

    #[error("no files staged for upload")]
    EmptyStaging,

    #[error("`{action}` is not allowed in the {phase} phase")]
    InvalidTransition {
        action: &'static str,
        phase: WizardPhase,
    },

    #[error("request failed: {0}")]
    Http(String),

    #[error("network timeout")]
    Timeout,

    #[error("service returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected response from service: {0}")]
    Decode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl SynomixError {
    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SynomixError::Timeout;
        }
        if err.is_decode() {
            return SynomixError::Decode(err.to_string());
        }
        SynomixError::Http(err.to_string())
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SynomixError::Http(_)
                | SynomixError::Timeout
                | SynomixError::Status { .. }
                | SynomixError::Decode(_)
        )
    }
}
