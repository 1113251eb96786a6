use approx::assert_relative_eq;
use combi::chunks::FeatureChunks;
use combi::io::{read_cohort, read_samples, read_weights, write_weights};
use combi::kernel::build_kernel_matrix;
use combi::progress::{NoopProgress, RecordingProgress, RunStatus};
use combi::{
    AnalysisMode, CombiAnalysis, CombiBuffers, CombiConfig, GenotypeEncoder, GenotypeSource,
    InMemoryGenotypes, SolverBackend,
};
use std::fs::{self, File};
use tempfile::tempdir;

// Marker rs1 separates cases (s1, s2) from controls (s3, s4). On rs2 and rs3 each
// case shares its call with one control.
const GENOTYPES: &str = "marker_id\tchromosome\tposition\ts1\ts2\ts3\ts4\n\
                         rs1\tchr1\t100\tAA\tAA\tGG\tGG\n\
                         rs2\tchr1\t200\tAC\tCC\tAC\tCC\n\
                         rs3\tchr1\t300\tTT\tCT\tTT\tCT\n";
const SAMPLES: &str = "sample_id\taffection\ns1\t2\ns2\t2\ns3\t1\ns4\t1\n";

fn load_cohort(dir: &std::path::Path) -> (InMemoryGenotypes, Vec<f64>) {
    let geno = dir.join("genotypes.tsv");
    let samples = dir.join("samples.tsv");
    fs::write(&geno, GENOTYPES).unwrap();
    fs::write(&samples, SAMPLES).unwrap();
    let cohort = read_cohort(&geno, &read_samples(&samples).unwrap()).unwrap();
    (cohort.genotypes, cohort.labels)
}

fn config(solver: SolverBackend) -> CombiConfig {
    CombiConfig {
        encoder: GenotypeEncoder::Genotypic,
        solver,
        mode: AnalysisMode::GenomeWide,
        eps: 1e-6,
        filter_width: 1,
        ..CombiConfig::default()
    }
}

#[test]
fn genotypic_features_and_kernel_for_a_small_cohort() {
    let dir = tempdir().unwrap();
    let (source, labels) = load_cohort(dir.path());
    assert_eq!(labels, vec![1.0, 1.0, -1.0, -1.0]);
    assert_eq!(source.n_samples(), 4);
    assert_eq!(source.n_markers(), 3);

    let markers = [0usize, 1, 2];
    let mut chunks =
        FeatureChunks::new(&source, &markers, GenotypeEncoder::Genotypic, 1 << 20, None).unwrap();
    assert_eq!(chunks.n_features(), 9);
    assert_eq!(chunks.num_chunks(), 1);
    {
        let chunk = chunks.get(0).unwrap();
        assert_eq!(chunk.dim(), (4, 9));
        for row in chunk.rows() {
            assert_relative_eq!(row.sum(), 3.0);
        }
    }

    let kernel = build_kernel_matrix(&mut chunks, None, &mut NoopProgress).unwrap();
    let expected = [
        [3.0, 1.0, 2.0, 0.0],
        [1.0, 3.0, 0.0, 2.0],
        [2.0, 0.0, 3.0, 1.0],
        [0.0, 2.0, 1.0, 3.0],
    ];
    for (r, row) in expected.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            assert_relative_eq!(kernel.get(r, c), *value);
        }
    }
}

#[test]
fn both_backends_rank_the_separating_marker_first() {
    let dir = tempdir().unwrap();
    let (source, labels) = load_cohort(dir.path());

    for solver in [SolverBackend::PrecomputedKernel, SolverBackend::SparseLinear] {
        let analysis = CombiAnalysis::new(config(solver)).unwrap();
        let mut progress = RecordingProgress::default();
        let output = analysis
            .run(&source, &labels, None, CombiBuffers::new(), &mut progress)
            .unwrap();

        assert_eq!(output.weights.len(), 3);
        assert!(output.weights[0] > output.weights[1], "{solver}: {:?}", output.weights);
        assert!(output.weights[0] > output.weights[2], "{solver}: {:?}", output.weights);
        assert_eq!(output.filtered_weights, output.weights);
        assert_eq!(output.report.significant.len(), 1);
        assert_eq!(output.report.significant[0].marker_id, "rs1");
        assert_eq!(output.report.significant[0].chromosome, "1");
        assert_eq!(progress.statuses.last(), Some(&RunStatus::Completed));
    }
}

#[test]
fn stored_weights_reproduce_the_report() {
    let dir = tempdir().unwrap();
    let (source, labels) = load_cohort(dir.path());
    let analysis = CombiAnalysis::new(config(SolverBackend::PrecomputedKernel)).unwrap();
    let output = analysis
        .run(&source, &labels, None, CombiBuffers::new(), &mut NoopProgress)
        .unwrap();

    let path = dir.path().join("combi_weights.tsv");
    write_weights(
        File::create(&path).unwrap(),
        source.markers(),
        &output.weights,
        &output.filtered_weights,
    )
    .unwrap();
    let loaded = read_weights(&path).unwrap();
    assert_eq!(loaded.weights.len(), 3);
    for (stored, original) in loaded.weights.iter().zip(&output.weights) {
        assert_relative_eq!(*stored, *original, max_relative = 1e-12);
    }

    let reselected = analysis
        .select_peaks(&loaded.markers, loaded.weights, None, &mut NoopProgress)
        .unwrap();
    assert_eq!(reselected.report.significant.len(), 1);
    assert_eq!(
        reselected.report.significant[0].marker_id,
        output.report.significant[0].marker_id
    );
}
