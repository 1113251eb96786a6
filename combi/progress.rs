use std::fmt;

/// Work stages inside one encode/train/decode run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombiStage {
    Encoding,
    KernelMatrix,
    Training,
    WeightRecovery,
    Filtering,
    PeakSelection,
}

impl CombiStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Encoding => "genotype encoding",
            Self::KernelMatrix => "kernel matrix accumulation",
            Self::Training => "classifier training",
            Self::WeightRecovery => "marker weight recovery",
            Self::Filtering => "weight smoothing",
            Self::PeakSelection => "peak selection",
        }
    }
}

impl fmt::Display for CombiStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Coarse lifecycle of an analysis, for display only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Initializing,
    Running { unit: String },
    Finalizing,
    Completed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::Running { unit } => write!(f, "running {unit}"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

/// Observer for reporting incremental progress of an analysis.
pub trait ProgressObserver {
    fn on_status(&mut self, status: &RunStatus) {
        let _ = status;
    }
    fn on_stage_start(&mut self, stage: CombiStage, total_steps: usize) {
        let _ = (stage, total_steps);
    }
    fn on_stage_advance(&mut self, stage: CombiStage, completed_steps: usize) {
        let _ = (stage, completed_steps);
    }
    fn on_stage_finish(&mut self, stage: CombiStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Records every event; used by tests to check stage ordering.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    pub statuses: Vec<RunStatus>,
    pub finished: Vec<CombiStage>,
}

impl ProgressObserver for RecordingProgress {
    fn on_status(&mut self, status: &RunStatus) {
        self.statuses.push(status.clone());
    }

    fn on_stage_finish(&mut self, stage: CombiStage) {
        self.finished.push(stage);
    }
}
