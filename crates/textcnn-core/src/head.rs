//! Binary classification head: logistic loss, predictions and
//! evaluation metrics on top of a single-logit model output.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TextCnnError};

/// Mean sigmoid cross-entropy over the batch.
///
/// Uses `max(x, 0) - x * y + ln(1 + e^-|x|)`, which stays finite for
/// large logits.
pub fn sigmoid_cross_entropy(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let positive = logits.relu()?;
    let xy = logits.mul(labels)?;
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    Ok(positive.sub(&xy)?.add(&softplus)?.mean_all()?)
}

/// Reject labels outside `{0, 1}`.
pub fn check_labels(labels: &[i32]) -> Result<()> {
    match labels.iter().find(|&&l| l != 0 && l != 1) {
        Some(&bad) => Err(TextCnnError::InvalidLabel(bad)),
        None => Ok(()),
    }
}

fn example_loss(logit: f32, label: f32) -> f32 {
    logit.max(0.0) - logit * label + (-logit.abs()).exp().ln_1p()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-example model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub logit: f32,
    /// Probability of class 1.
    pub probability: f32,
    /// `[P(class 0), P(class 1)]`
    pub probabilities: [f32; 2],
    pub class_id: u8,
}

impl Prediction {
    pub fn from_logit(logit: f32) -> Self {
        let probability = sigmoid(logit);
        Self {
            logit,
            probability,
            probabilities: [1.0 - probability, probability],
            class_id: u8::from(probability > 0.5),
        }
    }
}

/// Turn a `[batch, 1]` logits tensor into predictions.
pub fn predictions(logits: &Tensor) -> Result<Vec<Prediction>> {
    let values = logits.flatten_all()?.to_vec1::<f32>()?;
    Ok(values.into_iter().map(Prediction::from_logit).collect())
}

/// Evaluation metrics over one pass of an evaluation input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    /// Mean of per-batch losses.
    pub loss: f32,
    /// Mean of per-example losses.
    pub average_loss: f32,
    pub accuracy: f32,
    /// Accuracy of always predicting the majority label.
    pub accuracy_baseline: f32,
    pub precision: f32,
    pub recall: f32,
    /// Area under the ROC curve.
    pub auc: f32,
    pub label_mean: f32,
    pub prediction_mean: f32,
    pub examples: usize,
}

/// Collects logits and labels batch by batch.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    logits: Vec<f32>,
    labels: Vec<f32>,
    batch_losses: Vec<f32>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, logits: &[f32], labels: &[i32]) -> Result<()> {
        check_labels(labels)?;
        if logits.len() != labels.len() {
            return Err(TextCnnError::InvalidParams(format!(
                "{} logits for {} labels",
                logits.len(),
                labels.len()
            )));
        }
        if logits.is_empty() {
            return Ok(());
        }
        let start = self.logits.len();
        self.logits.extend_from_slice(logits);
        self.labels.extend(labels.iter().map(|&l| l as f32));

        let sum: f32 = self.logits[start..]
            .iter()
            .zip(&self.labels[start..])
            .map(|(&x, &y)| example_loss(x, y))
            .sum();
        self.batch_losses.push(sum / logits.len() as f32);
        Ok(())
    }

    pub fn finish(&self) -> EvalMetrics {
        let n = self.logits.len();
        if n == 0 {
            return EvalMetrics::default();
        }
        let nf = n as f32;

        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut fn_ = 0usize;
        let mut correct = 0usize;
        let mut loss_sum = 0.0f32;
        let mut prob_sum = 0.0f32;
        let mut probs = Vec::with_capacity(n);

        for (&logit, &label) in self.logits.iter().zip(&self.labels) {
            let p = Prediction::from_logit(logit);
            let positive = label > 0.5;
            match (p.class_id == 1, positive) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
            if (p.class_id == 1) == positive {
                correct += 1;
            }
            loss_sum += example_loss(logit, label);
            prob_sum += p.probability;
            probs.push(p.probability);
        }

        let label_mean = self.labels.iter().sum::<f32>() / nf;
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f32 / den as f32 };

        EvalMetrics {
            loss: self.batch_losses.iter().sum::<f32>() / self.batch_losses.len() as f32,
            average_loss: loss_sum / nf,
            accuracy: correct as f32 / nf,
            accuracy_baseline: label_mean.max(1.0 - label_mean),
            precision: ratio(tp, tp + fp),
            recall: ratio(tp, tp + fn_),
            auc: roc_auc(&probs, &self.labels),
            label_mean,
            prediction_mean: prob_sum / nf,
            examples: n,
        }
    }
}

/// ROC AUC from the rank-sum statistic, averaging ranks over ties.
/// Returns 0 when only one class is present.
pub fn roc_auc(scores: &[f32], labels: &[f32]) -> f32 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0f64; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based ranks i+1..=j+1 share their mean.
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }

    let positives = labels.iter().filter(|&&l| l > 0.5).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return 0.0;
    }
    let rank_sum: f64 = ranks
        .iter()
        .zip(labels)
        .filter(|(_, l)| **l > 0.5)
        .map(|(r, _)| *r)
        .sum();
    let p = positives as f64;
    ((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64)) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_loss_matches_closed_form() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[0.0f32], [2.0], [-3.0]], &device).unwrap();
        let labels = Tensor::new(&[[1.0f32], [0.0], [0.0]], &device).unwrap();
        let loss = sigmoid_cross_entropy(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();

        let expected =
            (example_loss(0.0, 1.0) + example_loss(2.0, 0.0) + example_loss(-3.0, 0.0)) / 3.0;
        assert!((loss - expected).abs() < 1e-5);
        assert!((example_loss(0.0, 1.0) - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_loss_finite_for_large_logits() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[200.0f32], [-200.0]], &device).unwrap();
        let labels = Tensor::new(&[[0.0f32], [1.0]], &device).unwrap();
        let loss = sigmoid_cross_entropy(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((loss - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_prediction() {
        let p = Prediction::from_logit(0.0);
        assert_eq!(p.class_id, 0);
        assert_eq!(p.probabilities, [0.5, 0.5]);
        assert_eq!(Prediction::from_logit(1.5).class_id, 1);
    }

    #[test]
    fn test_metrics() {
        let mut acc = MetricsAccumulator::new();
        acc.update(&[3.0, -2.0], &[1, 0]).unwrap();
        acc.update(&[1.0, -1.0], &[0, 1]).unwrap();
        let m = acc.finish();

        assert_eq!(m.examples, 4);
        assert_eq!(m.accuracy, 0.5);
        assert_eq!(m.precision, 0.5);
        assert_eq!(m.recall, 0.5);
        assert_eq!(m.label_mean, 0.5);
        assert_eq!(m.accuracy_baseline, 0.5);
        // positives scored 3.0 and -1.0, negatives -2.0 and 1.0
        assert!((m.auc - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_auc_extremes_and_ties() {
        assert_eq!(roc_auc(&[0.1, 0.9], &[0.0, 1.0]), 1.0);
        assert_eq!(roc_auc(&[0.9, 0.1], &[0.0, 1.0]), 0.0);
        assert_eq!(roc_auc(&[0.5, 0.5], &[0.0, 1.0]), 0.5);
        assert_eq!(roc_auc(&[0.2, 0.4], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_invalid_label() {
        let mut acc = MetricsAccumulator::new();
        assert!(matches!(
            acc.update(&[0.0], &[2]),
            Err(TextCnnError::InvalidLabel(2))
        ));
    }
}
