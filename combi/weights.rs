use crate::buffers::try_reserve;
use crate::chunks::FeatureChunks;
use crate::progress::{CombiStage, ProgressObserver};
use crate::source::GenotypeSource;
use crate::svm::{DualModel, TrainedModel};
use crate::types::{BufferKind, CombiError};

/// Primal weights `w[d] = sum coef_sv * x_sv[d]`, re-materialising every chunk.
///
/// The stored coefficient already carries the label sign, so it is used as-is.
pub fn recover_encoded_weights<S, P>(
    chunks: &mut FeatureChunks<'_, S>,
    model: &DualModel,
    progress: &mut P,
) -> Result<Vec<f64>, CombiError>
where
    S: GenotypeSource,
    P: ProgressObserver + ?Sized,
{
    let n_samples = chunks.n_samples();
    if let Some((sample, _)) = model.coefficients.iter().find(|(s, _)| *s >= n_samples) {
        return Err(CombiError::InvalidInput(format!(
            "support vector {sample} out of range ({n_samples} samples)"
        )));
    }

    let n_features = chunks.n_features();
    let mut weights = try_reserve(BufferKind::EncodedWeights, n_features)?;
    weights.resize(n_features, 0.0f64);

    let num_chunks = chunks.num_chunks();
    progress.on_stage_start(CombiStage::WeightRecovery, num_chunks);
    for index in 0..num_chunks {
        let columns = chunks.chunk_features(index);
        let chunk = chunks.get(index)?;
        let out = &mut weights[columns];
        for &(sample, coef) in &model.coefficients {
            for (w, x) in out.iter_mut().zip(chunk.row(sample)) {
                *w += coef * f64::from(*x);
            }
        }
        progress.on_stage_advance(CombiStage::WeightRecovery, index + 1);
    }
    progress.on_stage_finish(CombiStage::WeightRecovery);
    Ok(weights)
}

/// One decoded weight per marker of `chunks`, in marker order.
pub fn marker_weights<S, P>(
    chunks: &mut FeatureChunks<'_, S>,
    model: &TrainedModel,
    progress: &mut P,
) -> Result<Vec<f64>, CombiError>
where
    S: GenotypeSource,
    P: ProgressObserver + ?Sized,
{
    let encoder = chunks.encoder();
    let decoded = match model {
        TrainedModel::Dual(dual) => {
            let encoded = recover_encoded_weights(chunks, dual, progress)?;
            encoder.decode_weights(&encoded)?
        }
        TrainedModel::Primal(primal) => {
            if primal.weights.len() != chunks.n_features() {
                return Err(CombiError::InvalidInput(format!(
                    "model has {} feature weights, expected {}",
                    primal.weights.len(),
                    chunks.n_features()
                )));
            }
            encoder.decode_weights(&primal.weights)?
        }
    };
    debug_assert_eq!(decoded.len(), chunks.n_markers());
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::FEATURE_VALUE_BYTES;
    use crate::encoding::GenotypeEncoder;
    use crate::progress::NoopProgress;
    use crate::source::InMemoryGenotypes;
    use crate::svm::PrimalModel;
    use crate::types::Genotype;
    use approx::assert_relative_eq;

    fn source() -> InMemoryGenotypes {
        let g = |a: u8, b: u8| Genotype::new(a, b);
        let calls = vec![
            g(b'A', b'A'), g(b'A', b'G'), g(b'G', b'G'),
            g(b'C', b'C'), g(b'C', b'C'), g(b'T', b'T'),
        ];
        InMemoryGenotypes::from_calls(
            vec![("rs1".into(), "2".into(), 10), ("rs2".into(), "2".into(), 20)],
            calls,
            3,
        )
        .unwrap()
    }

    #[test]
    fn dual_weights_sum_support_vector_rows() {
        let source = source();
        let markers = [0usize, 1];
        let model = DualModel {
            coefficients: vec![(0, 0.5), (2, -0.25)],
            bias: 0.0,
            iterations: 1,
        };
        // One marker per chunk: recovery must stitch columns back together.
        let budget = 3 * 3 * FEATURE_VALUE_BYTES;
        let mut chunks =
            FeatureChunks::new(&source, &markers, GenotypeEncoder::Genotypic, budget, None)
                .unwrap();
        let encoded = recover_encoded_weights(&mut chunks, &model, &mut NoopProgress).unwrap();
        // Sample 0: AA, CC -> [1,0,0 | 1,0,0]; sample 2: GG, TT -> [0,0,1 | 0,0,1].
        assert_eq!(encoded, vec![0.5, 0.0, -0.25, 0.5, 0.0, -0.25]);

        let decoded =
            marker_weights(&mut chunks, &TrainedModel::Dual(model), &mut NoopProgress).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_relative_eq!(decoded[0], decoded[1], epsilon = 1e-12);
        assert_relative_eq!(decoded[0], 0.5f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn primal_weights_are_decoded_directly() {
        let source = source();
        let markers = [0usize, 1];
        let mut chunks =
            FeatureChunks::new(&source, &markers, GenotypeEncoder::Genotypic, 1 << 16, None)
                .unwrap();
        let model = TrainedModel::Primal(PrimalModel {
            weights: vec![3.0, 0.0, 0.0, 0.0, 4.0, 0.0],
            iterations: 1,
        });
        let decoded = marker_weights(&mut chunks, &model, &mut NoopProgress).unwrap();
        assert_relative_eq!(decoded[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(decoded[1], 0.8, epsilon = 1e-12);

        let short = TrainedModel::Primal(PrimalModel {
            weights: vec![1.0; 5],
            iterations: 1,
        });
        assert!(marker_weights(&mut chunks, &short, &mut NoopProgress).is_err());
    }
}
