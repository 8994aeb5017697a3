use std::io::{self, Write};

use serde::Serialize;

use crate::client::{AnalysisClient, ExperimentSummary, ShareLink};
use crate::domain::Experiment;
use crate::error::SynomixError;
use crate::preview::FilePreview;
use crate::progress::ProgressSink;
use crate::session::{AnalysisTicket, Session, WizardPhase};
use crate::staging::StagedItem;
use crate::upload::BatchSummary;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    pub experiment: Experiment,
    pub phase: WizardPhase,
    pub summary: Option<BatchSummary>,
    pub items: Vec<StagedItem>,
    pub analysis: Option<AnalysisTicket>,
    pub analysis_error: Option<String>,
}

impl SubmitResult {
    // `None` while the session has no experiment yet.
    pub fn from_session<C: AnalysisClient>(
        session: &Session<C>,
        analysis: Option<AnalysisTicket>,
    ) -> Option<Self> {
        Some(Self {
            experiment: session.experiment()?.clone(),
            phase: session.phase(),
            summary: session.summary(),
            items: session.staging().items().to_vec(),
            analysis,
            analysis_error: None,
        })
    }

    // A failed trigger is kept in `analysis_error` and returned alongside the result.
    pub fn finish<C: AnalysisClient>(
        session: &mut Session<C>,
        analyze: bool,
        sink: &dyn ProgressSink,
    ) -> Option<(Self, Option<SynomixError>)> {
        let (analysis, error) = if analyze {
            match session.analyze(sink) {
                Ok(ticket) => (Some(ticket), None),
                Err(err) => (None, Some(err)),
            }
        } else {
            (None, None)
        };
        let mut result = Self::from_session(session, analysis)?;
        result.analysis_error = error.as_ref().map(ToString::to_string);
        Some((result, error))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentList {
    pub count: usize,
    pub experiments: Vec<ExperimentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    pub files: Vec<FilePreview>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_submit(result: &SubmitResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_experiments(result: &ExperimentList) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_experiment(experiment: &Experiment) -> io::Result<()> {
        Self::print_json(experiment)
    }

    pub fn print_share(link: &ShareLink) -> io::Result<()> {
        Self::print_json(link)
    }

    pub fn print_analysis(ticket: &AnalysisTicket) -> io::Result<()> {
        Self::print_json(ticket)
    }

    pub fn print_inspect(result: &InspectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
