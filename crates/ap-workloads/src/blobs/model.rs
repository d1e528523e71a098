//! Linear softmax classifier over the blob features.

use ap_types::{ParamShapes, PrngKey};
use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::data::{standard_normal, Matrix};

/// Role of a scalar parameter. Submissions use it to exempt biases from
/// weight decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    Weight,
    Bias,
}

/// Parameters are laid out flat: the `classes x features` weight matrix in
/// row-major order, then one bias per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearSoftmax {
    pub num_features: usize,
    pub num_classes: usize,
}

/// Summed loss and gradient over one shard of a batch.
#[derive(Debug, Clone)]
pub struct ShardGrad {
    pub loss_sum: f64,
    pub grads: Vec<f32>,
}

/// Summed loss and hit count over one shard of an eval batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardEval {
    pub loss_sum: f64,
    pub correct: usize,
}

impl LinearSoftmax {
    fn weight_len(&self) -> usize {
        self.num_features * self.num_classes
    }

    pub fn num_params(&self) -> usize {
        self.weight_len() + self.num_classes
    }

    pub fn param_shapes(&self) -> ParamShapes {
        let mut shapes = ParamShapes::new();
        shapes.insert("dense/kernel".to_string(), vec![self.num_classes, self.num_features]);
        shapes.insert("dense/bias".to_string(), vec![self.num_classes]);
        shapes
    }

    pub fn param_types(&self) -> Vec<ParameterType> {
        let mut types = vec![ParameterType::Weight; self.weight_len()];
        types.extend(std::iter::repeat(ParameterType::Bias).take(self.num_classes));
        types
    }

    /// LeCun-normal weights, zero biases.
    pub fn init(&self, seed: PrngKey) -> Vec<f32> {
        let mut rng = seed.rng();
        let scale = 1.0 / (self.num_features as f32).sqrt();
        let mut params: Vec<f32> = (0..self.weight_len())
            .map(|_| scale * standard_normal(&mut rng))
            .collect();
        params.resize(self.num_params(), 0.0);
        params
    }

    fn logits_row(&self, params: &[f32], x: &[f32], out: &mut [f32]) {
        let (weights, bias) = params.split_at(self.weight_len());
        for (class, logit) in out.iter_mut().enumerate() {
            let w = &weights[class * self.num_features..(class + 1) * self.num_features];
            *logit = bias[class] + w.iter().zip(x).map(|(w, x)| w * x).sum::<f32>();
        }
    }

    pub fn logits(&self, params: &[f32], inputs: &Matrix, rows: Range<usize>) -> Matrix {
        let mut out = Matrix::zeros(rows.len(), self.num_classes);
        for (o, i) in rows.enumerate() {
            self.logits_row(params, inputs.row(i), out.row_mut(o));
        }
        out
    }

    pub fn gradient(&self, params: &[f32], inputs: &Matrix, labels: &[usize], rows: Range<usize>) -> ShardGrad {
        let mut grads = vec![0.0f32; self.num_params()];
        let mut logits = vec![0.0f32; self.num_classes];
        let mut loss_sum = 0.0;
        let bias_offset = self.weight_len();
        for i in rows {
            let x = inputs.row(i);
            self.logits_row(params, x, &mut logits);
            let (probs, loss) = softmax_with_loss(&logits, labels[i]);
            loss_sum += loss;
            for (class, p) in probs.iter().enumerate() {
                let delta = p - if class == labels[i] { 1.0 } else { 0.0 };
                let row = &mut grads[class * self.num_features..(class + 1) * self.num_features];
                for (g, x) in row.iter_mut().zip(x) {
                    *g += delta * x;
                }
                grads[bias_offset + class] += delta;
            }
        }
        ShardGrad { loss_sum, grads }
    }

    pub fn evaluate(&self, params: &[f32], inputs: &Matrix, labels: &[usize], rows: Range<usize>) -> ShardEval {
        let mut logits = vec![0.0f32; self.num_classes];
        let mut eval = ShardEval::default();
        for i in rows {
            self.logits_row(params, inputs.row(i), &mut logits);
            let (_, loss) = softmax_with_loss(&logits, labels[i]);
            eval.loss_sum += loss;
            if argmax(&logits) == labels[i] {
                eval.correct += 1;
            }
        }
        eval
    }
}

/// Softmax probabilities and the cross-entropy of `label`.
pub fn softmax_with_loss(logits: &[f32], label: usize) -> (Vec<f32>, f64) {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exp.iter().sum();
    let probs: Vec<f32> = exp.iter().map(|e| e / total).collect();
    let log_prob = (logits[label] - max) as f64 - (total as f64).ln();
    (probs, -log_prob)
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
