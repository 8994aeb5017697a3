use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SynomixError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CancerType {
    Breast,
    Lung,
    Colorectal,
    Prostate,
    Ovarian,
    Melanoma,
    Glioma,
    Pancreatic,
    Liver,
    Gastric,
}

impl CancerType {
    pub const ALL: [CancerType; 10] = [
        CancerType::Breast,
        CancerType::Lung,
        CancerType::Colorectal,
        CancerType::Prostate,
        CancerType::Ovarian,
        CancerType::Melanoma,
        CancerType::Glioma,
        CancerType::Pancreatic,
        CancerType::Liver,
        CancerType::Gastric,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CancerType::Breast => "breast",
            CancerType::Lung => "lung",
            CancerType::Colorectal => "colorectal",
            CancerType::Prostate => "prostate",
            CancerType::Ovarian => "ovarian",
            CancerType::Melanoma => "melanoma",
            CancerType::Glioma => "glioma",
            CancerType::Pancreatic => "pancreatic",
            CancerType::Liver => "liver",
            CancerType::Gastric => "gastric",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CancerType::Breast => "Breast Cancer",
            CancerType::Lung => "Lung Cancer",
            CancerType::Colorectal => "Colorectal Cancer",
            CancerType::Prostate => "Prostate Cancer",
            CancerType::Ovarian => "Ovarian Cancer",
            CancerType::Melanoma => "Melanoma",
            CancerType::Glioma => "Glioma",
            CancerType::Pancreatic => "Pancreatic Cancer",
            CancerType::Liver => "Liver Cancer",
            CancerType::Gastric => "Gastric Cancer",
        }
    }
}

impl fmt::Display for CancerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CancerType {
    type Err = SynomixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        CancerType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| SynomixError::InvalidCancerType(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    Expression,
    Mutation,
    Methylation,
    #[value(name = "cnv")]
    Cnv,
    Protein,
    Metabolomics,
    #[value(name = "single_cell")]
    SingleCell,
}

impl LayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            LayerType::Expression => "expression",
            LayerType::Mutation => "mutation",
            LayerType::Methylation => "methylation",
            LayerType::Cnv => "cnv",
            LayerType::Protein => "protein",
            LayerType::Metabolomics => "metabolomics",
            LayerType::SingleCell => "single_cell",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LayerType::Expression => "Expression (RNA-seq)",
            LayerType::Mutation => "Mutations",
            LayerType::Methylation => "Methylation",
            LayerType::Cnv => "Copy Number Variation",
            LayerType::Protein => "Proteomics",
            LayerType::Metabolomics => "Metabolomics",
            LayerType::SingleCell => "Single-Cell RNA-seq",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerType {
    type Err = SynomixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let layer = match normalized.as_str() {
            "expression" => LayerType::Expression,
            "mutation" => LayerType::Mutation,
            "methylation" => LayerType::Methylation,
            "cnv" | "copy_number" | "copy_number_variation" => LayerType::Cnv,
            "protein" => LayerType::Protein,
            "metabolomics" => LayerType::Metabolomics,
            "single_cell" => LayerType::SingleCell,
            _ => return Err(SynomixError::InvalidLayerType(value.to_string())),
        };
        Ok(layer)
    }
}

// Mirrors the server-side classification used when no layer type is sent.
pub fn detect_layer_type(file_name: &str) -> LayerType {
    let name = file_name.to_lowercase();
    let has_any = |needles: &[&str]| needles.iter().any(|needle| name.contains(needle));

    if has_any(&["rnaseq", "rna", "expression", "rsem", "rpkm", "fpkm", "tpm"]) {
        return LayerType::Expression;
    }
    if has_any(&["mutation", "mutsig", "maf", "snv"])
        || name.ends_with(".vcf")
        || name.ends_with(".cbt")
    {
        return LayerType::Mutation;
    }
    if has_any(&["methyl", "meth450", "meth27"]) {
        return LayerType::Methylation;
    }
    if has_any(&["cnv", "scnv", "gistic", "copy"]) {
        return LayerType::Cnv;
    }
    if has_any(&["rppa", "protein"]) {
        return LayerType::Protein;
    }
    LayerType::Expression
}

static EXPERIMENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("experiment id pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentId(String);

impl ExperimentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = SynomixError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        if !EXPERIMENT_ID_RE.is_match(normalized) {
            return Err(SynomixError::InvalidExperimentId(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

impl TryFrom<String> for ExperimentId {
    type Error = SynomixError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExperimentId> for String {
    fn from(value: ExperimentId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub name: String,
    pub cancer_type: CancerType,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub is_public: bool,
    pub share_token: Option<String>,
    pub status: Option<ExperimentStatus>,
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Csv,
    Tsv,
    Gzip,
}

impl FileKind {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let (_, ext) = lower.rsplit_once('.')?;
        match ext {
            "csv" => Some(FileKind::Csv),
            "tsv" | "txt" => Some(FileKind::Tsv),
            "gz" => Some(FileKind::Gzip),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            FileKind::Csv => "text/csv",
            FileKind::Tsv => "text/tab-separated-values",
            FileKind::Gzip => "application/gzip",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedFile {
    pub path: Utf8PathBuf,
    pub name: String,
    pub size: u64,
    pub kind: FileKind,
}

impl StagedFile {
    pub fn from_path(path: &Utf8Path) -> Result<Self, SynomixError> {
        let metadata = std::fs::metadata(path.as_std_path())
            .map_err(|err| SynomixError::Filesystem(format!("{path}: {err}")))?;
        if !metadata.is_file() {
            return Err(SynomixError::UnsupportedFile(format!(
                "{path} (not a regular file)"
            )));
        }
        Self::from_parts(path, metadata.len())
    }

    pub fn from_parts(path: impl Into<Utf8PathBuf>, size: u64) -> Result<Self, SynomixError> {
        let path = path.into();
        let name = path
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| SynomixError::UnsupportedFile(path.to_string()))?;
        let kind = FileKind::from_file_name(&name)
            .ok_or_else(|| SynomixError::UnsupportedFile(path.to_string()))?;
        Ok(Self {
            path,
            name,
            size,
            kind,
        })
    }

    pub fn size_mb(&self) -> f64 {
        self.size as f64 / 1024.0 / 1024.0
    }
}
