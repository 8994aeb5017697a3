use std::fmt;

use serde::Serialize;
use tracing::info;

use crate::domain::{ExperimentId, LayerType};
use crate::session::WizardPhase;
use crate::staging::{ItemId, ItemStatus, StagingStore};
use crate::upload::BatchSummary;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseChanged {
        from: WizardPhase,
        to: WizardPhase,
    },
    ExperimentCreated {
        id: ExperimentId,
        name: String,
    },
    ItemStarted {
        id: ItemId,
        file_name: String,
        layer_type: Option<LayerType>,
    },
    ItemProgress {
        id: ItemId,
        percent: u8,
    },
    ItemSucceeded {
        id: ItemId,
        layer_type: LayerType,
        gene_count: u64,
        sample_count: u64,
    },
    ItemFailed {
        id: ItemId,
        reason: String,
    },
    BatchCompleted(BatchSummary),
    AnalysisRequested {
        id: ExperimentId,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressEvent::PhaseChanged { from, to } => write!(f, "phase {from} -> {to}"),
            ProgressEvent::ExperimentCreated { id, name } => {
                write!(f, "experiment {id} created ({name})")
            }
            ProgressEvent::ItemStarted {
                id,
                file_name,
                layer_type,
            } => match layer_type {
                Some(layer) => write!(f, "upload {id} {file_name} as {layer}"),
                None => write!(f, "upload {id} {file_name} (auto-detect)"),
            },
            ProgressEvent::ItemProgress { id, percent } => write!(f, "upload {id} {percent}%"),
            ProgressEvent::ItemSucceeded {
                id,
                layer_type,
                gene_count,
                sample_count,
            } => write!(
                f,
                "upload {id} done: {layer_type}, {gene_count} genes, {sample_count} samples"
            ),
            ProgressEvent::ItemFailed { id, reason } => write!(f, "upload {id} failed: {reason}"),
            ProgressEvent::BatchCompleted(summary) => write!(
                f,
                "batch complete: {} succeeded, {} failed, {} skipped",
                summary.succeeded, summary.failed, summary.skipped
            ),
            ProgressEvent::AnalysisRequested { id } => write!(f, "analysis requested for {id}"),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn event(&self, _event: ProgressEvent) {}
}

// Per-percent upload ticks only go out at debug level.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match &event {
            ProgressEvent::ItemProgress { .. } => tracing::debug!("{event}"),
            _ => info!("{event}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Uploading,
    Success,
    Error,
}

impl ItemState {
    pub fn label(self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::Uploading => "uploading",
            ItemState::Success => "success",
            ItemState::Error => "error",
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, ItemState::Success | ItemState::Error)
    }
}

impl From<&ItemStatus> for ItemState {
    fn from(status: &ItemStatus) -> Self {
        match status {
            ItemStatus::Pending => ItemState::Pending,
            ItemStatus::Uploading => ItemState::Uploading,
            ItemStatus::Success { .. } => ItemState::Success,
            ItemStatus::Error { .. } => ItemState::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemProgressView {
    pub id: ItemId,
    pub file_name: String,
    pub size_mb: Option<f64>,
    pub layer_type: Option<LayerType>,
    pub percent: u8,
    pub state: ItemState,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    items: Vec<ItemProgressView>,
}

impl BatchProgress {
    pub fn from_store(store: &StagingStore) -> Self {
        let items = store
            .iter()
            .map(|item| ItemProgressView {
                id: item.id,
                file_name: item.file.name.clone(),
                size_mb: Some(item.file.size_mb()),
                layer_type: item.layer_type,
                percent: item.progress,
                state: ItemState::from(&item.status),
                detail: match &item.status {
                    ItemStatus::Success {
                        gene_count,
                        sample_count,
                    } => Some(format!("{gene_count} genes, {sample_count} samples")),
                    ItemStatus::Error { reason } => Some(reason.clone()),
                    _ => None,
                },
            })
            .collect();
        Self { items }
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ItemStarted {
                id,
                file_name,
                layer_type,
            } => match self.find_mut(*id) {
                Some(view) => {
                    view.state = ItemState::Uploading;
                    view.percent = 0;
                }
                None => self.items.push(ItemProgressView {
                    id: *id,
                    file_name: file_name.clone(),
                    size_mb: None,
                    layer_type: *layer_type,
                    percent: 0,
                    state: ItemState::Uploading,
                    detail: None,
                }),
            },
            ProgressEvent::ItemProgress { id, percent } => {
                if let Some(view) = self.find_mut(*id) {
                    view.percent = view.percent.max(*percent);
                }
            }
            ProgressEvent::ItemSucceeded {
                id,
                layer_type,
                gene_count,
                sample_count,
            } => {
                if let Some(view) = self.find_mut(*id) {
                    view.state = ItemState::Success;
                    view.percent = 100;
                    view.layer_type = Some(*layer_type);
                    view.detail = Some(format!("{gene_count} genes, {sample_count} samples"));
                }
            }
            ProgressEvent::ItemFailed { id, reason } => {
                if let Some(view) = self.find_mut(*id) {
                    view.state = ItemState::Error;
                    view.detail = Some(reason.clone());
                }
            }
            _ => {}
        }
    }

    pub fn items(&self) -> &[ItemProgressView] {
        &self.items
    }

    // Resolved items count as complete whatever their outcome.
    pub fn aggregate_percent(&self) -> u8 {
        if self.items.is_empty() {
            return 0;
        }
        let total: u64 = self
            .items
            .iter()
            .map(|view| {
                if view.state.is_resolved() {
                    100
                } else {
                    u64::from(view.percent)
                }
            })
            .sum();
        (total / self.items.len() as u64) as u8
    }

    pub fn resolved(&self) -> usize {
        self.items
            .iter()
            .filter(|view| view.state.is_resolved())
            .count()
    }

    fn find_mut(&mut self, id: ItemId) -> Option<&mut ItemProgressView> {
        self.items.iter_mut().find(|view| view.id == id)
    }
}
