use std::sync::Mutex;

use assert_matches::assert_matches;
use serde_json::json;

use synomix_stager::client::{AnalysisAccepted, AnalysisClient, UploadReceipt};
use synomix_stager::domain::{CancerType, Experiment, ExperimentId, LayerType, StagedFile};
use synomix_stager::error::SynomixError;
use synomix_stager::output::SubmitResult;
use synomix_stager::progress::{NoopSink, ProgressEvent, ProgressSink};
use synomix_stager::session::{Session, WizardPhase};
use synomix_stager::staging::ItemStatus;

#[derive(Default)]
struct MockService {
    calls: Mutex<Vec<String>>,
    fail_create: bool,
    fail_analyze: bool,
}

impl MockService {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl AnalysisClient for MockService {
    fn create_experiment(
        &self,
        name: &str,
        cancer_type: CancerType,
    ) -> Result<Experiment, SynomixError> {
        self.calls.lock().unwrap().push(format!("create {name}"));
        if self.fail_create {
            return Err(SynomixError::Status {
                status: 500,
                message: "database unavailable".to_string(),
            });
        }
        Ok(Experiment {
            id: "exp-1".parse().unwrap(),
            name: name.to_string(),
            cancer_type,
            created_at: None,
            updated_at: None,
            user_id: None,
            is_public: false,
            share_token: None,
            status: None,
        })
    }

    fn upload_layer(
        &self,
        _experiment: &ExperimentId,
        file: &StagedFile,
        _layer_type: Option<LayerType>,
        progress: &mut dyn FnMut(f64),
    ) -> Result<UploadReceipt, SynomixError> {
        self.calls.lock().unwrap().push(format!("upload {}", file.name));
        progress(50.0);
        match file.name.as_str() {
            "a.csv" => {
                progress(100.0);
                Ok(UploadReceipt {
                    layer_type: LayerType::Expression,
                    gene_count: 500,
                    sample_count: 40,
                })
            }
            _ => Err(SynomixError::Timeout),
        }
    }

    fn trigger_analysis(
        &self,
        experiment: &ExperimentId,
    ) -> Result<AnalysisAccepted, SynomixError> {
        self.calls.lock().unwrap().push(format!("analyze {experiment}"));
        if self.fail_analyze {
            return Err(SynomixError::Status {
                status: 409,
                message: "no layers uploaded".to_string(),
            });
        }
        Ok(AnalysisAccepted::from_body(
            experiment,
            json!({"status": "processing", "layers_analyzed": ["expression"]}),
        ))
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    fn phase_entries(&self, phase: WizardPhase) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| matches!(event, ProgressEvent::PhaseChanged { to, .. } if *to == phase))
            .count()
    }
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

fn cohort_files() -> Vec<StagedFile> {
    vec![
        StagedFile::from_parts("a.csv", 1024).unwrap(),
        StagedFile::from_parts("b.csv", 2048).unwrap(),
    ]
}

fn staged_session(service: MockService) -> Session<MockService> {
    let mut session = Session::new(service);
    session.set_name("Cohort A").unwrap();
    session.set_cancer_type(CancerType::Breast).unwrap();
    session.create_experiment(&NoopSink).unwrap();
    session
}

#[test]
fn cohort_a_reaches_ready_with_mixed_outcomes() {
    let sink = RecordingSink::default();
    let mut session = Session::new(MockService::default());
    session.set_name("Cohort A").unwrap();
    session.set_cancer_type(CancerType::Breast).unwrap();
    assert!(session.can_create_experiment());

    let experiment = session.create_experiment(&sink).unwrap();
    assert_eq!(experiment.name, "Cohort A");
    assert_eq!(experiment.cancer_type, CancerType::Breast);
    assert_eq!(session.phase(), WizardPhase::Staging);

    session.add_files(cohort_files()).unwrap();
    let summary = session.upload_all(&sink).unwrap();

    assert_eq!(session.phase(), WizardPhase::Ready);
    assert_eq!(sink.phase_entries(WizardPhase::Ready), 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(session.summary(), Some(summary));

    let items = session.staging().items();
    assert_eq!(
        items[0].status,
        ItemStatus::Success {
            gene_count: 500,
            sample_count: 40
        }
    );
    assert_eq!(items[0].layer_type, Some(LayerType::Expression));
    assert_eq!(
        items[1].status,
        ItemStatus::Error {
            reason: "network timeout".to_string()
        }
    );
}

#[test]
fn empty_name_blocks_creation_without_a_request() {
    let mut session = Session::new(MockService::default());
    session.set_name("").unwrap();
    session.set_cancer_type(CancerType::Lung).unwrap();
    assert!(!session.can_create_experiment());

    let err = session.create_experiment(&NoopSink).unwrap_err();
    assert_matches!(err, SynomixError::SetupIncomplete);
    assert_eq!(session.phase(), WizardPhase::Setup);
    assert!(session.experiment().is_none());
    assert!(session.client().calls().is_empty());
}

#[test]
fn missing_cancer_type_blocks_creation() {
    let mut session = Session::new(MockService::default());
    session.set_name("Cohort B").unwrap();
    let err = session.create_experiment(&NoopSink).unwrap_err();
    assert_matches!(err, SynomixError::SetupIncomplete);
    assert!(session.client().calls().is_empty());
}

#[test]
fn failed_creation_stays_in_setup() {
    let service = MockService {
        fail_create: true,
        ..MockService::default()
    };
    let mut session = Session::new(service);
    session.set_name("Cohort A").unwrap();
    session.set_cancer_type(CancerType::Breast).unwrap();

    let err = session.create_experiment(&NoopSink).unwrap_err();
    assert_matches!(err, SynomixError::Status { status: 500, .. });
    assert_eq!(session.phase(), WizardPhase::Setup);
    // The draft survives so the user can retry.
    assert_eq!(session.draft().name(), "Cohort A");
}

#[test]
fn upload_requires_staged_files() {
    let mut session = staged_session(MockService::default());
    let err = session.upload_all(&NoopSink).unwrap_err();
    assert_matches!(err, SynomixError::EmptyStaging);
    assert_eq!(session.phase(), WizardPhase::Staging);
}

#[test]
fn staging_actions_are_rejected_outside_their_phase() {
    let mut session = Session::new(MockService::default());
    assert_matches!(
        session.add_files(cohort_files()),
        Err(SynomixError::InvalidTransition {
            phase: WizardPhase::Setup,
            ..
        })
    );
    assert_matches!(
        session.upload_all(&NoopSink),
        Err(SynomixError::InvalidTransition { .. })
    );
    assert_matches!(
        session.set_layer_type(0, Some(LayerType::Protein)),
        Err(SynomixError::InvalidTransition { .. })
    );

    let mut session = staged_session(MockService::default());
    assert_matches!(
        session.set_name("renamed"),
        Err(SynomixError::InvalidTransition {
            phase: WizardPhase::Staging,
            ..
        })
    );
    assert_matches!(
        session.analyze(&NoopSink),
        Err(SynomixError::InvalidTransition { .. })
    );

    session.add_files(cohort_files()).unwrap();
    session.upload_all(&NoopSink).unwrap();
    assert_matches!(
        session.add_files(cohort_files()),
        Err(SynomixError::InvalidTransition {
            phase: WizardPhase::Ready,
            ..
        })
    );
    assert_matches!(session.remove(0), Err(SynomixError::InvalidTransition { .. }));
}

#[test]
fn removing_a_staged_file_before_upload() {
    let mut session = staged_session(MockService::default());
    session.add_files(cohort_files()).unwrap();

    let removed = session.remove(1).unwrap().unwrap();
    assert_eq!(removed.file.name, "b.csv");
    assert_eq!(session.staging().len(), 1);

    session.upload_all(&NoopSink).unwrap();
    assert_eq!(
        session.client().calls(),
        vec!["create Cohort A", "upload a.csv"]
    );
}

#[test]
fn analyze_from_ready() {
    let mut session = staged_session(MockService::default());
    session.add_files(cohort_files()).unwrap();
    session.upload_all(&NoopSink).unwrap();

    let ticket = session.analyze(&NoopSink).unwrap();
    assert_eq!(ticket.experiment_id.as_str(), "exp-1");
    assert_eq!(ticket.results_path, "/results/exp-1");
    assert_eq!(ticket.accepted.status.as_deref(), Some("processing"));
    assert_eq!(session.phase(), WizardPhase::Ready);
}

#[test]
fn failed_analyze_stays_ready() {
    let service = MockService {
        fail_analyze: true,
        ..MockService::default()
    };
    let mut session = staged_session(service);
    session.add_files(cohort_files()).unwrap();
    session.upload_all(&NoopSink).unwrap();

    let err = session.analyze(&NoopSink).unwrap_err();
    assert_matches!(err, SynomixError::Status { status: 409, .. });
    assert_eq!(session.phase(), WizardPhase::Ready);
    assert!(session.experiment().is_some());
}

#[test]
fn failed_analyze_still_reports_uploads() {
    let service = MockService {
        fail_analyze: true,
        ..MockService::default()
    };
    let mut session = staged_session(service);
    session.add_files(cohort_files()).unwrap();
    session.upload_all(&NoopSink).unwrap();

    let (result, error) = SubmitResult::finish(&mut session, true, &NoopSink).unwrap();
    assert_matches!(error, Some(SynomixError::Status { status: 409, .. }));
    assert_eq!(result.experiment.id.as_str(), "exp-1");
    assert_eq!(result.phase, WizardPhase::Ready);
    assert_eq!(result.items.len(), 2);
    assert_matches!(result.items[0].status, ItemStatus::Success { .. });
    assert_matches!(result.items[1].status, ItemStatus::Error { .. });
    assert!(result.analysis.is_none());
    assert_eq!(
        result.analysis_error.as_deref(),
        Some("service returned status 409: no layers uploaded")
    );
}

#[test]
fn submit_result_carries_analysis_ticket() {
    let mut session = staged_session(MockService::default());
    session.add_files(cohort_files()).unwrap();
    session.upload_all(&NoopSink).unwrap();

    let (result, error) = SubmitResult::finish(&mut session, true, &NoopSink).unwrap();
    assert!(error.is_none());
    assert!(result.analysis_error.is_none());
    let ticket = result.analysis.unwrap();
    assert_eq!(ticket.accepted.layers_analyzed, vec!["expression"]);

    let (result, error) = SubmitResult::finish(&mut session, false, &NoopSink).unwrap();
    assert!(error.is_none());
    assert!(result.analysis.is_none());
    assert_eq!(
        session
            .client()
            .calls()
            .iter()
            .filter(|call| call.starts_with("analyze"))
            .count(),
        1
    );
}

#[test]
fn phases_progress_in_order() {
    let sink = RecordingSink::default();
    let mut session = Session::new(MockService::default());
    session.set_name("Cohort A").unwrap();
    session.set_cancer_type(CancerType::Breast).unwrap();
    session.create_experiment(&sink).unwrap();
    session.add_files(cohort_files()).unwrap();
    session.upload_all(&sink).unwrap();

    let transitions: Vec<(WizardPhase, WizardPhase)> = sink
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::PhaseChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (WizardPhase::Setup, WizardPhase::Staging),
            (WizardPhase::Staging, WizardPhase::Processing),
            (WizardPhase::Processing, WizardPhase::Ready),
        ]
    );
}
