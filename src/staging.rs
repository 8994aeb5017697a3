use std::fmt;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{LayerType, StagedFile};

// Never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("#{}", self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Uploading,
    Success { gene_count: u64, sample_count: u64 },
    Error { reason: String },
}

impl ItemStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Uploading => "uploading",
            ItemStatus::Success { .. } => "success",
            ItemStatus::Error { .. } => "error",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ItemStatus::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Success { .. } | ItemStatus::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedItem {
    pub id: ItemId,
    pub file: StagedFile,
    pub layer_type: Option<LayerType>,
    pub progress: u8,
    #[serde(flatten)]
    pub status: ItemStatus,
}

impl StagedItem {
    pub fn gene_count(&self) -> Option<u64> {
        match self.status {
            ItemStatus::Success { gene_count, .. } => Some(gene_count),
            _ => None,
        }
    }

    pub fn sample_count(&self) -> Option<u64> {
        match self.status {
            ItemStatus::Success { sample_count, .. } => Some(sample_count),
            _ => None,
        }
    }

    pub fn error_reason(&self) -> Option<&str> {
        match &self.status {
            ItemStatus::Error { reason } => Some(reason),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusPatch {
    Uploading,
    Progress(u8),
    Succeeded {
        layer_type: LayerType,
        gene_count: u64,
        sample_count: u64,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingCounts {
    pub pending: usize,
    pub uploading: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct StagingStore {
    items: Vec<StagedItem>,
    next_id: u64,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I>(&mut self, files: I) -> Vec<ItemId>
    where
        I: IntoIterator<Item = StagedFile>,
    {
        let mut added = Vec::new();
        for file in files {
            let id = ItemId(self.next_id);
            self.next_id += 1;
            debug!(item = %id, file = %file.name, "staged");
            self.items.push(StagedItem {
                id,
                file,
                layer_type: None,
                progress: 0,
                status: ItemStatus::Pending,
            });
            added.push(id);
        }
        added
    }

    pub fn remove(&mut self, index: usize) -> Option<StagedItem> {
        if index >= self.items.len() {
            return None;
        }
        Some(self.items.remove(index))
    }

    pub fn remove_id(&mut self, id: ItemId) -> Option<StagedItem> {
        let index = self.position(id)?;
        self.remove(index)
    }

    pub fn set_layer_type(&mut self, index: usize, layer_type: Option<LayerType>) -> bool {
        match self.items.get_mut(index) {
            Some(item) => {
                item.layer_type = layer_type;
                true
            }
            None => false,
        }
    }

    // Stale ids, regressing progress and out-of-order transitions are dropped.
    pub fn update_status(&mut self, id: ItemId, patch: StatusPatch) -> bool {
        let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
            debug!(item = %id, "dropping update for removed item");
            return false;
        };

        match patch {
            StatusPatch::Uploading => {
                if !item.status.is_pending() {
                    warn!(item = %id, status = item.status.label(), "upload start ignored");
                    return false;
                }
                item.status = ItemStatus::Uploading;
                item.progress = 0;
                true
            }
            StatusPatch::Progress(value) => {
                if item.status != ItemStatus::Uploading {
                    return false;
                }
                let value = value.min(100);
                if value < item.progress {
                    return false;
                }
                item.progress = value;
                true
            }
            StatusPatch::Succeeded {
                layer_type,
                gene_count,
                sample_count,
            } => {
                if item.status != ItemStatus::Uploading {
                    warn!(item = %id, status = item.status.label(), "success ignored");
                    return false;
                }
                item.status = ItemStatus::Success {
                    gene_count,
                    sample_count,
                };
                item.layer_type = Some(layer_type);
                item.progress = 100;
                true
            }
            StatusPatch::Failed { reason } => {
                if item.status.is_terminal() {
                    warn!(item = %id, status = item.status.label(), "failure ignored");
                    return false;
                }
                item.status = ItemStatus::Error { reason };
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StagedItem> {
        self.items.get(index)
    }

    pub fn get_id(&self, id: ItemId) -> Option<&StagedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn position(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StagedItem> {
        self.items.iter()
    }

    pub fn items(&self) -> &[StagedItem] {
        &self.items
    }

    pub fn pending_ids(&self) -> Vec<ItemId> {
        self.items
            .iter()
            .filter(|item| item.status.is_pending())
            .map(|item| item.id)
            .collect()
    }

    pub fn counts(&self) -> StagingCounts {
        self.items
            .iter()
            .fold(StagingCounts::default(), |mut counts, item| {
                match item.status {
                    ItemStatus::Pending => counts.pending += 1,
                    ItemStatus::Uploading => counts.uploading += 1,
                    ItemStatus::Success { .. } => counts.succeeded += 1,
                    ItemStatus::Error { .. } => counts.failed += 1,
                }
                counts
            })
    }
}
