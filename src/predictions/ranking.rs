use std::cmp::Ordering;

use crate::inference::{ClassManifest, InferenceError};
use crate::predictions::repo_types::RankedPrediction;

/// Orders the engine output and keeps the best `k`.
///
/// Probability descending, ties broken by class name ascending, so the result
/// is a pure function of its inputs. Values are reported as given and never
/// re-normalized.
pub fn rank(
    manifest: &ClassManifest,
    probabilities: &[f64],
    k: usize,
) -> Result<Vec<RankedPrediction>, InferenceError> {
    if probabilities.len() != manifest.len() {
        return Err(InferenceError::WrongLength {
            expected: manifest.len(),
            actual: probabilities.len(),
        });
    }

    let mut scored = Vec::with_capacity(probabilities.len());
    for (index, &p) in probabilities.iter().enumerate() {
        if !p.is_finite() {
            return Err(InferenceError::NonFinite { index });
        }
        if p < 0.0 {
            return Err(InferenceError::Negative { index });
        }
        let label = manifest.label(index).ok_or(InferenceError::WrongLength {
            expected: manifest.len(),
            actual: probabilities.len(),
        })?;
        scored.push((label, p));
    }

    scored.sort_by(|(a_label, a), (b_label, b)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a_label.cmp(b_label))
    });

    Ok(scored
        .into_iter()
        .take(k)
        .enumerate()
        .map(|(i, (label, p))| RankedPrediction {
            rank: i as u32 + 1,
            class: label.to_string(),
            confidence: p,
            confidence_percent: p * 100.0,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(labels: &[&str]) -> ClassManifest {
        ClassManifest::new(labels.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    fn classes(ranked: &[RankedPrediction]) -> Vec<&str> {
        ranked.iter().map(|r| r.class.as_str()).collect()
    }

    #[test]
    fn ties_break_by_class_name() {
        let m = manifest(&["Apple_scab", "Apple_healthy", "Black_rot"]);
        let probs = [0.5, 0.5, 0.0];

        let first = rank(&m, &probs, 5).unwrap();
        assert_eq!(classes(&first), vec!["Apple_healthy", "Apple_scab", "Black_rot"]);
        for _ in 0..10 {
            assert_eq!(rank(&m, &probs, 5).unwrap(), first);
        }
        assert_eq!(first[0].rank, 1);
        assert_eq!(first[2].rank, 3);
    }

    #[test]
    fn keeps_top_k_without_renormalizing() {
        let m = manifest(&["a", "b", "c", "d"]);
        let ranked = rank(&m, &[0.1, 0.4, 0.2, 0.05], 2).unwrap();
        assert_eq!(classes(&ranked), vec!["b", "c"]);
        assert_eq!(ranked[0].confidence, 0.4);
        assert!((ranked[0].confidence_percent - 40.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_vectors() {
        let m = manifest(&["a", "b"]);
        assert!(matches!(
            rank(&m, &[1.0], 5),
            Err(InferenceError::WrongLength { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            rank(&m, &[0.5, f64::NAN], 5),
            Err(InferenceError::NonFinite { index: 1 })
        ));
        assert!(matches!(
            rank(&m, &[-0.1, 1.1], 5),
            Err(InferenceError::Negative { index: 0 })
        ));
    }
}
