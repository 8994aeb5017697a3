use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use camino::Utf8Path;
use flate2::read::GzDecoder;
use serde::Serialize;

use crate::domain::{FileKind, LayerType, StagedFile, detect_layer_type};
use crate::error::SynomixError;

// The service sniffs this many leading characters.
const SNIFF_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    Tab,
    Comma,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePreview {
    pub file_name: String,
    pub kind: FileKind,
    pub separator: Separator,
    pub columns: usize,
    pub sample_estimate: usize,
    pub rows_scanned: usize,
    pub truncated: bool,
    pub detected_layer: LayerType,
}

pub fn preview_file(file: &StagedFile, max_rows: usize) -> Result<FilePreview, SynomixError> {
    let handle = open(&file.path)?;
    let reader: Box<dyn Read> = match file.kind {
        FileKind::Gzip => Box::new(GzDecoder::new(handle)),
        FileKind::Csv | FileKind::Tsv => Box::new(handle),
    };
    preview_reader(&file.name, file.kind, BufReader::new(reader), max_rows)
}

pub fn preview_reader<R: BufRead>(
    file_name: &str,
    kind: FileKind,
    reader: R,
    max_rows: usize,
) -> Result<FilePreview, SynomixError> {
    let mut lines = reader.lines();
    let header = match lines.next() {
        Some(line) => line.map_err(|err| read_error(file_name, err))?,
        None => String::new(),
    };

    let mut sniffed = header.clone();
    let mut body = Vec::new();
    let mut truncated = false;
    for line in lines {
        let line = line.map_err(|err| read_error(file_name, err))?;
        if line.trim().is_empty() {
            continue;
        }
        if body.len() == max_rows {
            truncated = true;
            break;
        }
        if sniffed.len() < SNIFF_CHARS {
            sniffed.push('\n');
            sniffed.push_str(&line);
        }
        body.push(line);
    }

    let sniff_end = sniffed
        .char_indices()
        .nth(SNIFF_CHARS)
        .map(|(index, _)| index)
        .unwrap_or(sniffed.len());
    let separator = if sniffed[..sniff_end].contains('\t') {
        Separator::Tab
    } else {
        Separator::Comma
    };
    let delimiter = match separator {
        Separator::Tab => '\t',
        Separator::Comma => ',',
    };

    let columns = if header.trim().is_empty() {
        0
    } else {
        header.split(delimiter).count()
    };
    Ok(FilePreview {
        file_name: file_name.to_string(),
        kind,
        separator,
        columns,
        sample_estimate: columns.saturating_sub(1),
        rows_scanned: body.len(),
        truncated,
        // Same full-name rule the service applies on upload.
        detected_layer: detect_layer_type(file_name),
    })
}

fn open(path: &Utf8Path) -> Result<File, SynomixError> {
    File::open(path.as_std_path()).map_err(|err| SynomixError::Filesystem(format!("{path}: {err}")))
}

fn read_error(file_name: &str, err: std::io::Error) -> SynomixError {
    SynomixError::Filesystem(format!("{file_name}: {err}"))
}
