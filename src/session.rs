use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::client::{AnalysisAccepted, AnalysisClient};
use crate::domain::{CancerType, Experiment, ExperimentId, LayerType, StagedFile};
use crate::error::SynomixError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::staging::{ItemId, StagedItem, StagingStore};
use crate::upload::{BatchSummary, UploadOrchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardPhase {
    Setup = 1,
    Staging = 2,
    Processing = 3,
    Ready = 4,
}

impl WizardPhase {
    pub const ALL: [WizardPhase; 4] = [
        WizardPhase::Setup,
        WizardPhase::Staging,
        WizardPhase::Processing,
        WizardPhase::Ready,
    ];

    pub fn step(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            WizardPhase::Setup => "Experiment Details",
            WizardPhase::Staging => "Upload Data",
            WizardPhase::Processing => "Processing",
            WizardPhase::Ready => "Analyze",
        }
    }
}

impl fmt::Display for WizardPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardPhase::Setup => "setup",
            WizardPhase::Staging => "staging",
            WizardPhase::Processing => "processing",
            WizardPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Stage {
    Setup,
    Staging {
        experiment: Experiment,
    },
    Processing {
        experiment: Experiment,
    },
    Ready {
        experiment: Experiment,
        summary: BatchSummary,
    },
}

impl Stage {
    fn phase(&self) -> WizardPhase {
        match self {
            Stage::Setup => WizardPhase::Setup,
            Stage::Staging { .. } => WizardPhase::Staging,
            Stage::Processing { .. } => WizardPhase::Processing,
            Stage::Ready { .. } => WizardPhase::Ready,
        }
    }

    fn experiment(&self) -> Option<&Experiment> {
        match self {
            Stage::Setup => None,
            Stage::Staging { experiment }
            | Stage::Processing { experiment }
            | Stage::Ready { experiment, .. } => Some(experiment),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentDraft {
    name: String,
    cancer_type: Option<CancerType>,
}

impl ExperimentDraft {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancer_type(&self) -> Option<CancerType> {
        self.cancer_type
    }

    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty() && self.cancer_type.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisTicket {
    pub experiment_id: ExperimentId,
    pub results_path: String,
    pub accepted: AnalysisAccepted,
}

impl AnalysisTicket {
    pub fn new(experiment_id: ExperimentId, accepted: AnalysisAccepted) -> Self {
        Self {
            results_path: format!("/results/{experiment_id}"),
            experiment_id,
            accepted,
        }
    }
}

pub struct Session<C: AnalysisClient> {
    client: C,
    stage: Stage,
    draft: ExperimentDraft,
    staging: StagingStore,
}

impl<C: AnalysisClient> Session<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            stage: Stage::Setup,
            draft: ExperimentDraft::default(),
            staging: StagingStore::new(),
        }
    }

    pub fn phase(&self) -> WizardPhase {
        self.stage.phase()
    }

    pub fn draft(&self) -> &ExperimentDraft {
        &self.draft
    }

    pub fn experiment(&self) -> Option<&Experiment> {
        self.stage.experiment()
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        match &self.stage {
            Stage::Ready { summary, .. } => Some(*summary),
            _ => None,
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), SynomixError> {
        self.require(WizardPhase::Setup, "set name")?;
        self.draft.name = name.into();
        Ok(())
    }

    pub fn set_cancer_type(&mut self, cancer_type: CancerType) -> Result<(), SynomixError> {
        self.require(WizardPhase::Setup, "select cancer type")?;
        self.draft.cancer_type = Some(cancer_type);
        Ok(())
    }

    pub fn can_create_experiment(&self) -> bool {
        self.phase() == WizardPhase::Setup && self.draft.is_complete()
    }

    pub fn create_experiment(
        &mut self,
        sink: &dyn ProgressSink,
    ) -> Result<Experiment, SynomixError> {
        self.require(WizardPhase::Setup, "create experiment")?;
        let cancer_type = match self.draft.cancer_type {
            Some(cancer_type) if self.draft.is_complete() => cancer_type,
            _ => return Err(SynomixError::SetupIncomplete),
        };

        let name = self.draft.name.trim().to_string();
        let experiment = match self.client.create_experiment(&name, cancer_type) {
            Ok(experiment) => experiment,
            Err(err) => {
                warn!(error = %err, "experiment creation failed");
                return Err(err);
            }
        };
        sink.event(ProgressEvent::ExperimentCreated {
            id: experiment.id.clone(),
            name: experiment.name.clone(),
        });
        self.enter(
            Stage::Staging {
                experiment: experiment.clone(),
            },
            sink,
        );
        Ok(experiment)
    }

    pub fn add_files<I>(&mut self, files: I) -> Result<Vec<ItemId>, SynomixError>
    where
        I: IntoIterator<Item = StagedFile>,
    {
        self.require(WizardPhase::Staging, "add files")?;
        Ok(self.staging.add(files))
    }

    pub fn remove(&mut self, index: usize) -> Result<Option<StagedItem>, SynomixError> {
        self.require(WizardPhase::Staging, "remove file")?;
        Ok(self.staging.remove(index))
    }

    pub fn set_layer_type(
        &mut self,
        index: usize,
        layer_type: Option<LayerType>,
    ) -> Result<bool, SynomixError> {
        if self.phase() == WizardPhase::Setup {
            return Err(self.invalid("set layer type"));
        }
        Ok(self.staging.set_layer_type(index, layer_type))
    }

    pub fn upload_all(&mut self, sink: &dyn ProgressSink) -> Result<BatchSummary, SynomixError> {
        let experiment = match &self.stage {
            Stage::Staging { experiment } => experiment.clone(),
            _ => return Err(self.invalid("upload all")),
        };
        if self.staging.is_empty() {
            return Err(SynomixError::EmptyStaging);
        }

        self.enter(
            Stage::Processing {
                experiment: experiment.clone(),
            },
            sink,
        );
        let summary =
            UploadOrchestrator::new(&self.client).run(&mut self.staging, &experiment.id, sink);
        self.enter(
            Stage::Ready {
                experiment,
                summary,
            },
            sink,
        );
        Ok(summary)
    }

    // A rejected request keeps the session in Ready.
    pub fn analyze(&mut self, sink: &dyn ProgressSink) -> Result<AnalysisTicket, SynomixError> {
        let experiment_id = match &self.stage {
            Stage::Ready { experiment, .. } => experiment.id.clone(),
            _ => return Err(self.invalid("analyze")),
        };
        sink.event(ProgressEvent::AnalysisRequested {
            id: experiment_id.clone(),
        });
        let accepted = self.client.trigger_analysis(&experiment_id).map_err(|err| {
            warn!(experiment = %experiment_id, error = %err, "analysis request failed");
            err
        })?;
        info!(experiment = %experiment_id, "analysis accepted");
        Ok(AnalysisTicket::new(experiment_id, accepted))
    }

    fn enter(&mut self, next: Stage, sink: &dyn ProgressSink) {
        let from = self.phase();
        self.stage = next;
        let to = self.phase();
        info!(%from, %to, "phase changed");
        sink.event(ProgressEvent::PhaseChanged { from, to });
    }

    fn require(&self, phase: WizardPhase, action: &'static str) -> Result<(), SynomixError> {
        if self.phase() != phase {
            return Err(self.invalid(action));
        }
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> SynomixError {
        SynomixError::InvalidTransition {
            action,
            phase: self.phase(),
        }
    }
}
