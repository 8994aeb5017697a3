use serde::Serialize;
use tracing::{debug, info, warn};

use crate::client::AnalysisClient;
use crate::domain::ExperimentId;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::staging::{ItemId, StagingStore, StatusPatch};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct UploadOrchestrator<'a, C: AnalysisClient + ?Sized> {
    client: &'a C,
}

impl<'a, C: AnalysisClient + ?Sized> UploadOrchestrator<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    // Works from a snapshot of pending ids; anything added later stays pending.
    pub fn run(
        &self,
        store: &mut StagingStore,
        experiment: &ExperimentId,
        sink: &dyn ProgressSink,
    ) -> BatchSummary {
        let queue = store.pending_ids();
        let mut summary = BatchSummary {
            skipped: store.len() - queue.len(),
            ..BatchSummary::default()
        };
        info!(experiment = %experiment, queued = queue.len(), "starting upload batch");

        for id in queue {
            let succeeded = match self.upload_one(store, experiment, id, sink) {
                Some(succeeded) => succeeded,
                None => {
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.attempted += 1;
            if succeeded {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "upload batch complete"
        );
        sink.event(ProgressEvent::BatchCompleted(summary));
        summary
    }

    fn upload_one(
        &self,
        store: &mut StagingStore,
        experiment: &ExperimentId,
        id: ItemId,
        sink: &dyn ProgressSink,
    ) -> Option<bool> {
        let item = store.get_id(id)?;
        if !item.status.is_pending() {
            debug!(item = %id, status = item.status.label(), "skipping item");
            return None;
        }
        let file = item.file.clone();
        let requested = item.layer_type;

        store.update_status(id, StatusPatch::Uploading);
        sink.event(ProgressEvent::ItemStarted {
            id,
            file_name: file.name.clone(),
            layer_type: requested,
        });

        let mut last = 0u8;
        let result = self
            .client
            .upload_layer(experiment, &file, requested, &mut |reported| {
                let percent = clamp_percent(reported);
                if percent <= last {
                    return;
                }
                if store.update_status(id, StatusPatch::Progress(percent)) {
                    last = percent;
                    sink.event(ProgressEvent::ItemProgress { id, percent });
                }
            });

        match result {
            Ok(receipt) => {
                info!(
                    item = %id,
                    file = %file.name,
                    layer = %receipt.layer_type,
                    genes = receipt.gene_count,
                    samples = receipt.sample_count,
                    "layer uploaded"
                );
                store.update_status(
                    id,
                    StatusPatch::Succeeded {
                        layer_type: receipt.layer_type,
                        gene_count: receipt.gene_count,
                        sample_count: receipt.sample_count,
                    },
                );
                sink.event(ProgressEvent::ItemSucceeded {
                    id,
                    layer_type: receipt.layer_type,
                    gene_count: receipt.gene_count,
                    sample_count: receipt.sample_count,
                });
                Some(true)
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(item = %id, file = %file.name, %reason, "layer upload failed");
                store.update_status(
                    id,
                    StatusPatch::Failed {
                        reason: reason.clone(),
                    },
                );
                sink.event(ProgressEvent::ItemFailed { id, reason });
                Some(false)
            }
        }
    }
}

fn clamp_percent(reported: f64) -> u8 {
    if reported.is_nan() {
        return 0;
    }
    reported.clamp(0.0, 100.0).round() as u8
}
