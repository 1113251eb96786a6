// ========================================================================================
//
//                                  THE COMBI ORCHESTRATOR
//
// ========================================================================================
//
// One analysis is: encode -> (kernel) -> train -> recover/decode weights, once per
// chromosome or once genome-wide, followed by per-chromosome smoothing and peak
// selection. Large buffers flow in through `CombiBuffers` and back out with the result,
// so consecutive units (and consecutive analyses) reuse the same allocations.

use itertools::Itertools;
use rayon::prelude::*;
use std::time::Instant;

use crate::buffers::CombiBuffers;
use crate::chunks::FeatureChunks;
use crate::config::{AnalysisMode, CombiConfig, SignificanceThreshold, SolverBackend};
use crate::kernel::build_kernel_matrix;
use crate::peaks::{Peak, PeakMode, PeakReport, PeakRow, find_peaks, moving_average_filter};
use crate::progress::{CombiStage, NoopProgress, ProgressObserver, RunStatus};
use crate::source::GenotypeSource;
use crate::svm::{
    KernelSvc, LinearSvc, PrecomputedProblem, Solver, SparseProblem, TrainedModel,
    validate_labels,
};
use crate::types::{CombiError, compare_chromosomes};
use crate::weights::marker_weights;

/// Everything an analysis produces.
#[derive(Debug)]
pub struct CombiOutput {
    /// Decoded weight per marker, in source order.
    pub weights: Vec<f64>,
    /// Smoothed weight per marker, in source order.
    pub filtered_weights: Vec<f64>,
    /// Peaks of every chromosome, chromosome by chromosome, strongest first. A peak's
    /// `index` counts markers of its chromosome in position order.
    pub peaks: Vec<Peak>,
    pub report: PeakReport,
    /// Buffers to hand to the next analysis.
    pub buffers: CombiBuffers,
}

/// A chromosome label with its marker indices ordered by position.
pub type ChromosomeGroup = (String, Vec<usize>);

/// Groups the source's markers by chromosome in natural chromosome order.
pub fn chromosome_groups<S: GenotypeSource + ?Sized>(source: &S) -> Vec<ChromosomeGroup> {
    let mut groups: Vec<ChromosomeGroup> = (0..source.n_markers())
        .map(|ix| (source.marker(ix).chromosome.clone(), ix))
        .into_group_map()
        .into_iter()
        .collect();
    groups.sort_by(|a, b| compare_chromosomes(&a.0, &b.0));
    for (_, markers) in &mut groups {
        markers.sort_by_key(|&ix| (source.marker(ix).position, ix));
    }
    groups
}

pub struct CombiAnalysis {
    config: CombiConfig,
}

impl CombiAnalysis {
    pub fn new(config: CombiConfig) -> Result<Self, CombiError> {
        config
            .validate()
            .map_err(|e| CombiError::InvalidInput(e.to_string()))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CombiConfig {
        &self.config
    }

    /// Runs the full analysis. `p_values`, when given, holds one p-value per marker in
    /// source order and replaces the filtered weights as the peak-detection series.
    pub fn run<S, P>(
        &self,
        source: &S,
        labels: &[f64],
        p_values: Option<&[f64]>,
        mut buffers: CombiBuffers,
        progress: &mut P,
    ) -> Result<CombiOutput, CombiError>
    where
        S: GenotypeSource,
        P: ProgressObserver + ?Sized,
    {
        progress.on_status(&RunStatus::Initializing);
        self.check_inputs(source, labels, p_values)?;
        let started = Instant::now();
        let groups = chromosome_groups(source);
        log::info!(
            "COMBI {} run: {} markers on {} chromosomes, {} samples, {} encoding, {} solver",
            self.config.mode,
            source.n_markers(),
            groups.len(),
            source.n_samples(),
            self.config.encoder,
            self.config.solver
        );

        let mut weights = vec![0.0; source.n_markers()];
        match self.config.mode {
            AnalysisMode::PerChromosome => {
                for (chromosome, markers) in &groups {
                    progress.on_status(&RunStatus::Running {
                        unit: format!("chromosome {chromosome}"),
                    });
                    let (unit_weights, returned) =
                        self.run_unit(source, markers, labels, buffers, progress)?;
                    buffers = returned;
                    scatter(&mut weights, markers, &unit_weights);
                }
            }
            AnalysisMode::GenomeWide => {
                progress.on_status(&RunStatus::Running {
                    unit: "genome".to_string(),
                });
                let markers: Vec<usize> = (0..source.n_markers()).collect();
                let (unit_weights, returned) =
                    self.run_unit(source, &markers, labels, buffers, progress)?;
                buffers = returned;
                weights = unit_weights;
            }
        }

        let output = self.finish(source, &groups, weights, p_values, buffers, progress)?;
        log::info!(
            "COMBI finished in {:.2?}: {} significant and {} insignificant peaks",
            started.elapsed(),
            output.report.significant.len(),
            output.report.insignificant.len()
        );
        Ok(output)
    }

    /// Per-chromosome analysis with chromosomes trained concurrently. Each task
    /// allocates its own buffers.
    pub fn run_chromosomes_parallel<S, P>(
        &self,
        source: &S,
        labels: &[f64],
        p_values: Option<&[f64]>,
        progress: &mut P,
    ) -> Result<CombiOutput, CombiError>
    where
        S: GenotypeSource + Sync,
        P: ProgressObserver + ?Sized,
    {
        if self.config.mode != AnalysisMode::PerChromosome {
            return Err(CombiError::InvalidInput(
                "parallel runs require per-chromosome mode".into(),
            ));
        }
        progress.on_status(&RunStatus::Initializing);
        self.check_inputs(source, labels, p_values)?;
        let groups = chromosome_groups(source);
        progress.on_status(&RunStatus::Running {
            unit: format!("{} chromosomes in parallel", groups.len()),
        });

        let results = groups
            .par_iter()
            .map(|(_, markers)| {
                self.run_unit(source, markers, labels, CombiBuffers::new(), &mut NoopProgress)
            })
            .collect::<Result<Vec<_>, CombiError>>()?;

        let mut weights = vec![0.0; source.n_markers()];
        let mut buffers = CombiBuffers::new();
        for ((_, markers), (unit_weights, returned)) in groups.iter().zip(results) {
            scatter(&mut weights, markers, &unit_weights);
            buffers = returned;
        }
        self.finish(source, &groups, weights, p_values, buffers, progress)
    }

    /// Smoothing and peak selection over weights from an earlier run. Only the
    /// source's marker records are read.
    pub fn select_peaks<S, P>(
        &self,
        source: &S,
        weights: Vec<f64>,
        p_values: Option<&[f64]>,
        progress: &mut P,
    ) -> Result<CombiOutput, CombiError>
    where
        S: GenotypeSource,
        P: ProgressObserver + ?Sized,
    {
        progress.on_status(&RunStatus::Initializing);
        if weights.len() != source.n_markers() {
            return Err(CombiError::InvalidInput(format!(
                "{} weights supplied for {} markers",
                weights.len(),
                source.n_markers()
            )));
        }
        self.check_p_values(source.n_markers(), p_values)?;
        let groups = chromosome_groups(source);
        self.finish(source, &groups, weights, p_values, CombiBuffers::new(), progress)
    }

    /// Encodes, trains and decodes one unit of markers. Returns one weight per entry of
    /// `markers`, in the same order, plus the buffers for the next unit.
    pub fn run_unit<S, P>(
        &self,
        source: &S,
        markers: &[usize],
        labels: &[f64],
        mut buffers: CombiBuffers,
        progress: &mut P,
    ) -> Result<(Vec<f64>, CombiBuffers), CombiError>
    where
        S: GenotypeSource,
        P: ProgressObserver + ?Sized,
    {
        let config = &self.config;
        let params = config.svm_parameters();
        let mut chunks = FeatureChunks::new(
            source,
            markers,
            config.encoder,
            config.chunk_budget_bytes,
            buffers.chunk_storage.take(),
        )?;
        log::debug!(
            "Unit of {} markers: {} features in {} chunks",
            chunks.n_markers(),
            chunks.n_features(),
            chunks.num_chunks()
        );

        let model = match config.solver {
            SolverBackend::PrecomputedKernel => {
                let kernel = build_kernel_matrix(&mut chunks, buffers.kernel.take(), progress)?;
                let problem = PrecomputedProblem::from_kernel(
                    kernel.view()?,
                    labels,
                    buffers.kernel_problem.take(),
                )?;
                buffers.kernel = Some(kernel);
                let model = train(&KernelSvc, &problem, &params, progress)?;
                buffers.kernel_problem = Some(problem);
                model
            }
            SolverBackend::SparseLinear => {
                let problem = SparseProblem::from_chunks(
                    &mut chunks,
                    labels,
                    buffers.sparse_problem.take(),
                    progress,
                )?;
                let model = train(&LinearSvc, &problem, &params, progress)?;
                buffers.sparse_problem = Some(problem);
                model
            }
        };

        let weights = marker_weights(&mut chunks, &model, progress)?;
        buffers.chunk_storage = Some(chunks.into_storage());
        Ok((weights, buffers))
    }

    fn check_inputs<S: GenotypeSource>(
        &self,
        source: &S,
        labels: &[f64],
        p_values: Option<&[f64]>,
    ) -> Result<(), CombiError> {
        if source.n_markers() == 0 {
            return Err(CombiError::InvalidInput("the data set has no markers".into()));
        }
        if labels.len() != source.n_samples() {
            return Err(CombiError::LabelCountMismatch {
                found: labels.len(),
                expected: source.n_samples(),
            });
        }
        validate_labels(labels)?;
        self.check_p_values(source.n_markers(), p_values)
    }

    fn check_p_values(&self, n_markers: usize, p_values: Option<&[f64]>) -> Result<(), CombiError> {
        match p_values {
            Some(p) if p.len() != n_markers => Err(CombiError::InvalidInput(format!(
                "{} p-values supplied for {} markers",
                p.len(),
                n_markers
            ))),
            Some(p) => match p.iter().position(|v| !(*v > 0.0 && *v <= 1.0)) {
                Some(index) => Err(CombiError::InvalidPValue {
                    index,
                    value: p[index],
                }),
                None => Ok(()),
            },
            None if matches!(self.config.threshold, SignificanceThreshold::PValue(_)) => {
                Err(CombiError::MissingPValues)
            }
            None => Ok(()),
        }
    }

    /// Smoothing and peak selection, chromosome by chromosome.
    fn finish<S, P>(
        &self,
        source: &S,
        groups: &[ChromosomeGroup],
        weights: Vec<f64>,
        p_values: Option<&[f64]>,
        buffers: CombiBuffers,
        progress: &mut P,
    ) -> Result<CombiOutput, CombiError>
    where
        S: GenotypeSource,
        P: ProgressObserver + ?Sized,
    {
        progress.on_status(&RunStatus::Finalizing);
        let config = &self.config;

        progress.on_stage_start(CombiStage::Filtering, groups.len());
        let mut filtered_weights = vec![0.0; weights.len()];
        for (done, (_, markers)) in groups.iter().enumerate() {
            let series: Vec<f64> = markers.iter().map(|&ix| weights[ix]).collect();
            let smoothed = moving_average_filter(
                &series,
                config.filter_width,
                config.p_norm,
                config.absolute_filter,
            )?;
            scatter(&mut filtered_weights, markers, &smoothed);
            progress.on_stage_advance(CombiStage::Filtering, done + 1);
        }
        progress.on_stage_finish(CombiStage::Filtering);

        let options = config.peak_options();
        let mut peaks = Vec::new();
        let mut report = PeakReport::default();
        progress.on_stage_start(CombiStage::PeakSelection, groups.len());
        for (done, (chromosome, markers)) in groups.iter().enumerate() {
            let all_series: Vec<f64> = match p_values {
                Some(p) => markers.iter().map(|&ix| -p[ix].log10()).collect(),
                None => markers.iter().map(|&ix| filtered_weights[ix]).collect(),
            };
            let kept = one_marker_per_position(source, markers, &all_series, options.mode);
            if kept.len() < 3 {
                log::warn!(
                    "Chromosome {chromosome} has {} distinct marker positions; skipping peak selection",
                    kept.len()
                );
                progress.on_stage_advance(CombiStage::PeakSelection, done + 1);
                continue;
            }
            if kept.len() < markers.len() {
                log::debug!(
                    "Chromosome {chromosome}: {} markers share a position with a stronger one",
                    markers.len() - kept.len()
                );
            }
            let positions: Vec<u64> = kept.iter().map(|&k| source.marker(markers[k]).position).collect();
            let series: Vec<f64> = kept.iter().map(|&k| all_series[k]).collect();
            let mut found = find_peaks(chromosome, &positions, &series, &options)?;
            for peak in &mut found {
                peak.index = kept[peak.index];
            }
            report.push_chromosome(found.iter().map(|peak| {
                let ix = markers[peak.index];
                let marker = source.marker(ix);
                PeakRow {
                    chromosome: marker.chromosome.clone(),
                    marker_id: marker.id.clone(),
                    position: marker.position,
                    p_value: p_values.map(|p| p[ix]),
                    weight: weights[ix],
                }
            }));
            peaks.extend(found);
            progress.on_stage_advance(CombiStage::PeakSelection, done + 1);
        }
        progress.on_stage_finish(CombiStage::PeakSelection);
        progress.on_status(&RunStatus::Completed);

        Ok(CombiOutput {
            weights,
            filtered_weights,
            peaks,
            report,
            buffers,
        })
    }
}

fn train<V, P>(
    solver: &V,
    problem: &V::Problem,
    params: &crate::svm::SvmParameters,
    progress: &mut P,
) -> Result<TrainedModel, CombiError>
where
    V: Solver,
    P: ProgressObserver + ?Sized,
{
    progress.on_stage_start(CombiStage::Training, 1);
    let started = Instant::now();
    let model = solver.train(problem, params)?;
    log::info!(
        "Trained {}/{} classifier in {:.2?} ({} iterations)",
        V::SVM_TYPE,
        V::KERNEL_TYPE,
        started.elapsed(),
        model.iterations()
    );
    progress.on_stage_advance(CombiStage::Training, 1);
    progress.on_stage_finish(CombiStage::Training);
    Ok(model)
}

/// Offsets into `markers` (ordered by position) keeping one marker per position: the
/// one with the largest detection value, the earlier one on ties.
fn one_marker_per_position<S>(source: &S, markers: &[usize], series: &[f64], mode: PeakMode) -> Vec<usize>
where
    S: GenotypeSource + ?Sized,
{
    let strength = |k: usize| match mode {
        PeakMode::PositiveOnly => series[k],
        PeakMode::DoubleSided => series[k].abs(),
    };
    let mut kept: Vec<usize> = Vec::with_capacity(markers.len());
    for k in 0..markers.len() {
        let position = source.marker(markers[k]).position;
        match kept.last_mut() {
            Some(last) if source.marker(markers[*last]).position == position => {
                if strength(k) > strength(*last) {
                    *last = k;
                }
            }
            _ => kept.push(k),
        }
    }
    kept
}

fn scatter(target: &mut [f64], markers: &[usize], values: &[f64]) {
    for (&ix, &value) in markers.iter().zip(values) {
        target[ix] = value;
    }
}
