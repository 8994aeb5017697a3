use std::collections::HashMap;
use std::sync::Mutex;

use synomix_stager::client::{AnalysisAccepted, AnalysisClient, UploadReceipt};
use synomix_stager::domain::{CancerType, Experiment, ExperimentId, LayerType, StagedFile};
use synomix_stager::error::SynomixError;
use synomix_stager::progress::{ProgressEvent, ProgressSink};
use synomix_stager::staging::{ItemStatus, StagingStore, StatusPatch};
use synomix_stager::upload::UploadOrchestrator;

#[derive(Default)]
struct ScriptedUploads {
    log: Mutex<Vec<String>>,
    progress: HashMap<String, Vec<f64>>,
    failures: Vec<String>,
}

impl ScriptedUploads {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl AnalysisClient for ScriptedUploads {
    fn create_experiment(
        &self,
        _name: &str,
        _cancer_type: CancerType,
    ) -> Result<Experiment, SynomixError> {
        Err(SynomixError::Http("not used".to_string()))
    }

    fn upload_layer(
        &self,
        _experiment: &ExperimentId,
        file: &StagedFile,
        layer_type: Option<LayerType>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<UploadReceipt, SynomixError> {
        let requested = layer_type.map(|layer| layer.to_string()).unwrap_or_else(|| "auto".to_string());
        self.log
            .lock()
            .unwrap()
            .push(format!("start {} {requested}", file.name));
        for value in self.progress.get(&file.name).cloned().unwrap_or_default() {
            progress(value);
        }
        self.log.lock().unwrap().push(format!("end {}", file.name));

        if self.failures.contains(&file.name) {
            return Err(SynomixError::Timeout);
        }
        Ok(UploadReceipt {
            layer_type: layer_type.unwrap_or(LayerType::Expression),
            gene_count: 100,
            sample_count: 10,
        })
    }

    fn trigger_analysis(
        &self,
        _experiment: &ExperimentId,
    ) -> Result<AnalysisAccepted, SynomixError> {
        Err(SynomixError::Http("not used".to_string()))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn experiment_id() -> ExperimentId {
    "exp-42".parse().unwrap()
}

fn stage(store: &mut StagingStore, names: &[&str]) {
    store.add(
        names
            .iter()
            .map(|name| StagedFile::from_parts(*name, 4096).unwrap()),
    );
}

#[test]
fn uploads_run_one_at_a_time_in_staging_order() {
    let client = ScriptedUploads::default();
    let mut store = StagingStore::new();
    stage(&mut store, &["a.csv", "b.csv", "c.csv"]);

    let summary =
        UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &RecordingSink::default());

    assert_eq!(
        client.log(),
        vec![
            "start a.csv auto",
            "end a.csv",
            "start b.csv auto",
            "end b.csv",
            "start c.csv auto",
            "end c.csv",
        ]
    );
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 3);
}

#[test]
fn a_failed_item_does_not_stop_the_batch() {
    let client = ScriptedUploads {
        failures: vec!["b.csv".to_string()],
        ..ScriptedUploads::default()
    };
    let mut store = StagingStore::new();
    stage(&mut store, &["a.csv", "b.csv", "c.csv"]);

    let summary =
        UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &RecordingSink::default());

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        store.get(1).unwrap().status,
        ItemStatus::Error {
            reason: "network timeout".to_string()
        }
    );
    assert_eq!(store.get(2).unwrap().gene_count(), Some(100));
}

#[test]
fn progress_is_clamped_and_never_goes_back() {
    let mut progress = HashMap::new();
    progress.insert(
        "a.csv".to_string(),
        vec![10.0, 35.0, 20.0, 35.2, 150.0, -5.0, f64::NAN],
    );
    let client = ScriptedUploads {
        progress,
        ..ScriptedUploads::default()
    };
    let mut store = StagingStore::new();
    stage(&mut store, &["a.csv"]);
    let sink = RecordingSink::default();

    UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &sink);

    let percents: Vec<u8> = sink
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProgressEvent::ItemProgress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![10, 35, 100]);
    assert_eq!(store.get(0).unwrap().progress, 100);
}

#[test]
fn non_pending_items_are_skipped() {
    let client = ScriptedUploads::default();
    let mut store = StagingStore::new();
    stage(&mut store, &["a.csv", "b.csv"]);
    let done = store.get(0).unwrap().id;
    store.update_status(done, StatusPatch::Uploading);
    store.update_status(
        done,
        StatusPatch::Succeeded {
            layer_type: LayerType::Mutation,
            gene_count: 7,
            sample_count: 3,
        },
    );

    let summary =
        UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &RecordingSink::default());

    assert_eq!(client.log(), vec!["start b.csv auto", "end b.csv"]);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.attempted, 1);
    assert_eq!(store.get(0).unwrap().gene_count(), Some(7));
}

#[test]
fn layer_override_is_sent_with_the_upload() {
    let client = ScriptedUploads::default();
    let mut store = StagingStore::new();
    stage(&mut store, &["calls.csv"]);
    store.set_layer_type(0, Some(LayerType::Cnv));

    UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &RecordingSink::default());

    assert_eq!(client.log()[0], "start calls.csv cnv");
    assert_eq!(store.get(0).unwrap().layer_type, Some(LayerType::Cnv));
}

#[test]
fn batch_reports_start_and_completion_per_item() {
    let client = ScriptedUploads {
        failures: vec!["b.csv".to_string()],
        ..ScriptedUploads::default()
    };
    let mut store = StagingStore::new();
    stage(&mut store, &["a.csv", "b.csv"]);
    let sink = RecordingSink::default();

    UploadOrchestrator::new(&client).run(&mut store, &experiment_id(), &sink);

    let events = sink.events();
    let started = events
        .iter()
        .filter(|event| matches!(event, ProgressEvent::ItemStarted { .. }))
        .count();
    assert_eq!(started, 2);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::BatchCompleted(summary)) if summary.succeeded == 1 && summary.failed == 1
    ));
}
