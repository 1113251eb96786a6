#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::error::Error;
use std::fs::{self, File};
use std::io::{BufWriter, IsTerminal};
use std::path::{Path, PathBuf};
use std::process;

use combi::config::{AnalysisMode, CombiConfig, SignificanceThreshold, SolverBackend};
use combi::io::{read_cohort, read_p_values, read_samples, read_weights, write_weights};
use combi::peaks::{PeakMode, write_rows};
use combi::progress::{CombiStage, ProgressObserver, RunStatus};
use combi::{CombiAnalysis, CombiBuffers, CombiOutput, GenotypeEncoder, GenotypeSource, MarkerRecord};

#[derive(Clone, Copy, ValueEnum)]
pub enum EncoderCli {
    Allelic,
    Genotypic,
    Nominal,
}

impl From<EncoderCli> for GenotypeEncoder {
    fn from(value: EncoderCli) -> Self {
        match value {
            EncoderCli::Allelic => GenotypeEncoder::Allelic,
            EncoderCli::Genotypic => GenotypeEncoder::Genotypic,
            EncoderCli::Nominal => GenotypeEncoder::Nominal,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SolverCli {
    /// C-SVC over the precomputed sample kernel
    Kernel,
    /// Dual coordinate descent over sparse features
    Linear,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeCli {
    PerChromosome,
    GenomeWide,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum PeakModeCli {
    Positive,
    DoubleSided,
}

/// Smoothing and peak-selection options shared by `run` and `peaks`.
#[derive(Args)]
pub struct PeakArgs {
    /// Moving-average window in markers (odd)
    #[arg(long, value_name = "MARKERS")]
    pub filter_width: Option<usize>,

    /// Order of the p-norm used by the moving average
    #[arg(long, value_name = "P")]
    pub p_norm: Option<f64>,

    /// Smooth signed weights instead of their magnitudes
    #[arg(long)]
    pub signed_filter: bool,

    /// Minimum base-pair distance between reported peaks
    #[arg(long, value_name = "BP")]
    pub min_peak_distance: Option<u64>,

    #[arg(long, value_enum)]
    pub peak_mode: Option<PeakModeCli>,

    /// Minimum filtered weight for a peak
    #[arg(long, value_name = "WEIGHT", conflicts_with = "p_threshold")]
    pub weight_threshold: Option<f64>,

    /// Maximum p-value for a peak; requires --p-values
    #[arg(long, value_name = "P", requires = "p_values")]
    pub p_threshold: Option<f64>,

    /// Table of marker_id and p_value; peaks are then selected on -log10(p)
    #[arg(long, value_name = "PATH")]
    pub p_values: Option<PathBuf>,
}

impl PeakArgs {
    fn apply(&self, config: &mut CombiConfig) {
        if let Some(width) = self.filter_width {
            config.filter_width = width;
        }
        if let Some(p) = self.p_norm {
            config.p_norm = p;
        }
        if self.signed_filter {
            config.absolute_filter = false;
        }
        if let Some(distance) = self.min_peak_distance {
            config.min_peak_distance = distance;
        }
        if let Some(mode) = self.peak_mode {
            config.peak_mode = match mode {
                PeakModeCli::Positive => PeakMode::PositiveOnly,
                PeakModeCli::DoubleSided => PeakMode::DoubleSided,
            };
        }
        if let Some(weight) = self.weight_threshold {
            config.threshold = SignificanceThreshold::Weight(weight);
        }
        if let Some(p) = self.p_threshold {
            config.threshold = SignificanceThreshold::PValue(p);
        }
    }
}

#[derive(Args)]
pub struct RunArgs {
    /// Genotype table: marker_id, chromosome, position, then one column per sample (.gz ok)
    #[arg(value_name = "GENOTYPES")]
    pub genotypes: PathBuf,

    /// Sample table: sample_id and affection (2 = case, 1 = control)
    #[arg(value_name = "SAMPLES")]
    pub samples: PathBuf,

    /// TOML configuration; flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the effective configuration to this path
    #[arg(long, value_name = "PATH")]
    pub save_config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub encoder: Option<EncoderCli>,

    #[arg(long, value_enum)]
    pub solver: Option<SolverCli>,

    /// Soft-margin penalty C
    #[arg(long)]
    pub c: Option<f64>,

    /// Solver stopping tolerance
    #[arg(long)]
    pub eps: Option<f64>,

    #[arg(long, value_name = "N")]
    pub max_iterations: Option<usize>,

    #[arg(long, value_enum)]
    pub mode: Option<ModeCli>,

    /// Memory budget for one block of encoded features
    #[arg(long, value_name = "MIB")]
    pub chunk_budget_mib: Option<usize>,

    /// Train chromosomes concurrently (per-chromosome mode only)
    #[arg(long)]
    pub parallel: bool,

    /// Output directory
    #[arg(long, short, default_value = ".")]
    pub out: PathBuf,

    #[command(flatten)]
    pub peaks: PeakArgs,
}

impl RunArgs {
    fn apply(&self, config: &mut CombiConfig) {
        if let Some(encoder) = self.encoder {
            config.encoder = encoder.into();
        }
        if let Some(solver) = self.solver {
            config.solver = match solver {
                SolverCli::Kernel => SolverBackend::PrecomputedKernel,
                SolverCli::Linear => SolverBackend::SparseLinear,
            };
        }
        if let Some(c) = self.c {
            config.c = c;
        }
        if let Some(eps) = self.eps {
            config.eps = eps;
        }
        if self.max_iterations.is_some() {
            config.max_iterations = self.max_iterations;
        }
        if let Some(mode) = self.mode {
            config.mode = match mode {
                ModeCli::PerChromosome => AnalysisMode::PerChromosome,
                ModeCli::GenomeWide => AnalysisMode::GenomeWide,
            };
        }
        if let Some(mib) = self.chunk_budget_mib {
            config.chunk_budget_bytes = mib.saturating_mul(1024 * 1024);
        }
        self.peaks.apply(config);
    }
}

#[derive(Args)]
pub struct PeaksArgs {
    /// Weight table written by `combi run`
    #[arg(value_name = "WEIGHTS")]
    pub weights: PathBuf,

    /// TOML configuration; flags override its values
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output directory
    #[arg(long, short, default_value = ".")]
    pub out: PathBuf,

    #[command(flatten)]
    pub peaks: PeakArgs,
}

#[derive(Parser)]
#[command(
    name = "combi",
    about = "Classifier-based marker weighting and peak selection for case/control studies",
    long_about = "Trains a support vector machine on encoded genotypes, converts its solution \
                 into one weight per marker, smooths the weights along each chromosome and \
                 reports the strongest peaks."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Weight markers and select peaks
    #[command(about = "Run the full analysis (outputs: combi_weights.tsv, combi_significant.tsv, combi_insignificant.tsv)")]
    Run(RunArgs),

    /// Re-select peaks from an existing weight table without retraining
    #[command(about = "Smooth stored weights and select peaks")]
    Peaks(PeaksArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Peaks(args)) => peaks(args),
        None => Cli::command()
            .print_help()
            .map(|()| println!())
            .map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<CombiConfig, Box<dyn Error>> {
    match path {
        Some(path) => {
            let config = CombiConfig::load(path)?;
            eprintln!("> Loaded configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(CombiConfig::default()),
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);
    let analysis = CombiAnalysis::new(config)?;
    if let Some(path) = &args.save_config {
        analysis.config().save(path)?;
        eprintln!("> Saved configuration to {}", path.display());
    }

    let samples = read_samples(&args.samples)?;
    let cohort = read_cohort(&args.genotypes, &samples)?;
    let cases = cohort.labels.iter().filter(|l| **l > 0.0).count();
    eprintln!(
        "> {} markers, {} samples ({} cases, {} controls)",
        cohort.genotypes.n_markers(),
        cohort.genotypes.n_samples(),
        cases,
        cohort.labels.len() - cases
    );
    let p_values = args
        .peaks
        .p_values
        .as_deref()
        .map(|path| read_p_values(path, cohort.genotypes.markers()))
        .transpose()?;

    let mut progress = BarProgress::default();
    let output = if args.parallel {
        analysis.run_chromosomes_parallel(
            &cohort.genotypes,
            &cohort.labels,
            p_values.as_deref(),
            &mut progress,
        )?
    } else {
        analysis.run(
            &cohort.genotypes,
            &cohort.labels,
            p_values.as_deref(),
            CombiBuffers::new(),
            &mut progress,
        )?
    };
    write_outputs(&args.out, cohort.genotypes.markers(), &output)
}

fn peaks(args: PeaksArgs) -> Result<(), Box<dyn Error>> {
    let mut config = load_config(args.config.as_deref())?;
    args.peaks.apply(&mut config);
    let analysis = CombiAnalysis::new(config)?;

    let loaded = read_weights(&args.weights)?;
    let p_values = args
        .peaks
        .p_values
        .as_deref()
        .map(|path| read_p_values(path, loaded.markers.markers()))
        .transpose()?;
    let mut progress = BarProgress::default();
    let output = analysis.select_peaks(
        &loaded.markers,
        loaded.weights,
        p_values.as_deref(),
        &mut progress,
    )?;
    write_outputs(&args.out, loaded.markers.markers(), &output)
}

fn write_outputs(dir: &Path, markers: &[MarkerRecord], output: &CombiOutput) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(dir)?;
    let weights_path = dir.join("combi_weights.tsv");
    write_weights(
        BufWriter::new(File::create(&weights_path)?),
        markers,
        &output.weights,
        &output.filtered_weights,
    )?;
    let significant_path = dir.join("combi_significant.tsv");
    write_rows(BufWriter::new(File::create(&significant_path)?), &output.report.significant)?;
    let insignificant_path = dir.join("combi_insignificant.tsv");
    write_rows(
        BufWriter::new(File::create(&insignificant_path)?),
        &output.report.insignificant,
    )?;

    eprintln!(
        "> Wrote {} marker weights to {}",
        output.weights.len(),
        weights_path.display()
    );
    eprintln!(
        "> {} significant peaks in {}, {} more in {}",
        output.report.significant.len(),
        significant_path.display(),
        output.report.insignificant.len(),
        insignificant_path.display()
    );
    Ok(())
}

// ========================================================================================
//                                   Terminal progress
// ========================================================================================

fn create_progress_bar(len: u64, message: String) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    let style = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("█▉▊▋▌▍▎▏  "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(message);

    pb
}

/// One bar per stage, labelled with the unit currently being analysed.
#[derive(Default)]
struct BarProgress {
    unit: Option<String>,
    bar: Option<ProgressBar>,
}

impl ProgressObserver for BarProgress {
    fn on_status(&mut self, status: &RunStatus) {
        match status {
            RunStatus::Running { unit } => {
                eprintln!("> Analysing {unit}");
                self.unit = Some(unit.clone());
            }
            RunStatus::Finalizing => self.unit = None,
            RunStatus::Initializing | RunStatus::Completed => {}
        }
    }

    fn on_stage_start(&mut self, stage: CombiStage, total_steps: usize) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        let message = match &self.unit {
            Some(unit) => format!("{stage} ({unit})"),
            None => stage.to_string(),
        };
        self.bar = Some(create_progress_bar(total_steps as u64, message));
    }

    fn on_stage_advance(&mut self, _stage: CombiStage, completed_steps: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(completed_steps as u64);
        }
    }

    fn on_stage_finish(&mut self, _stage: CombiStage) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
