//! Synthetic Gaussian-blob dataset and its batch queues.

use ap_types::{config_error, ApResult, PrngKey, Split};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;

/// Dense row-major matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Returns `None` when `data` does not hold `rows * cols` values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f32] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Shape and noise of the generated blobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobSpec {
    pub num_features: usize,
    pub num_classes: usize,
    /// Distance of each class center from the origin along its own axis.
    pub center_scale: f32,
    pub noise_std: f32,
    /// Fixed seed of the dataset itself, independent of any trial seed.
    pub dataset_seed: i64,
}

impl Default for BlobSpec {
    fn default() -> Self {
        Self {
            num_features: 8,
            num_classes: 4,
            center_scale: 3.0,
            noise_std: 1.0,
            dataset_seed: 1729,
        }
    }
}

impl BlobSpec {
    /// A spec needs at least one class and one feature axis to place centers on.
    pub fn validate(&self) -> ApResult<()> {
        if self.num_classes == 0 || self.num_features == 0 {
            return Err(config_error!(
                "Blob spec needs at least one class and one feature, got {} classes and {} features",
                self.num_classes,
                self.num_features
            ));
        }
        if !self.center_scale.is_finite() || !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(config_error!(
                "Blob spec has invalid center scale {} or noise {}",
                self.center_scale,
                self.noise_std
            ));
        }
        Ok(())
    }
}

/// Examples of one split.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub features: Matrix,
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Gather the given rows into a batch.
    pub fn gather(&self, indices: &[usize]) -> (Matrix, Vec<usize>) {
        let cols = self.features.cols();
        let mut features = Matrix::zeros(indices.len(), cols);
        let mut labels = Vec::with_capacity(indices.len());
        for (out, &i) in indices.iter().enumerate() {
            features.row_mut(out).copy_from_slice(self.features.row(i));
            labels.push(self.labels[i]);
        }
        (features, labels)
    }
}

fn split_stream(split: Split) -> u64 {
    match split {
        Split::Train => 0,
        Split::EvalTrain => 1,
        Split::Validation => 2,
        Split::Test => 3,
    }
}

/// Standard normal draw (Box-Muller).
pub(crate) fn standard_normal(rng: &mut ChaCha8Rng) -> f32 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()) as f32
}

/// Generate `n` examples of `split`. Labels cycle through the classes so every
/// split is balanced.
///
/// `eval_train` draws from the same stream as `train`, so it is a prefix of the
/// training set like the reference workloads' eval-train subsets.
pub fn generate(spec: &BlobSpec, split: Split, n: usize) -> Dataset {
    let stream = match split {
        Split::EvalTrain => split_stream(Split::Train),
        other => split_stream(other),
    };
    let mut rng = PrngKey::from_seed(spec.dataset_seed).fold_in(stream).rng();
    let mut features = Matrix::zeros(n, spec.num_features);
    let mut labels = Vec::with_capacity(n);
    for i in 0..n {
        let label = i % spec.num_classes;
        let row = features.row_mut(i);
        for value in row.iter_mut() {
            *value = spec.noise_std * standard_normal(&mut rng);
        }
        row[label % spec.num_features] += spec.center_scale;
        labels.push(label);
    }
    Dataset { features, labels }
}

/// Batch iterator over one split.
///
/// A training queue shuffles with its seed and repeats forever. An evaluation
/// queue makes one ordered pass and keeps the final partial batch.
#[derive(Debug)]
pub struct BlobsQueue {
    dataset: Arc<Dataset>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Option<ChaCha8Rng>,
}

impl BlobsQueue {
    pub fn repeating(dataset: Arc<Dataset>, batch_size: usize, seed: PrngKey) -> Self {
        let mut rng = seed.rng();
        let mut order: Vec<usize> = (0..dataset.len()).collect();
        order.shuffle(&mut rng);
        Self {
            dataset,
            batch_size,
            order,
            cursor: 0,
            rng: Some(rng),
        }
    }

    pub fn single_pass(dataset: Arc<Dataset>, batch_size: usize) -> Self {
        let order = (0..dataset.len()).collect();
        Self {
            dataset,
            batch_size,
            order,
            cursor: 0,
            rng: None,
        }
    }
}

impl Iterator for BlobsQueue {
    type Item = (Matrix, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.order.is_empty() || self.batch_size == 0 {
            return None;
        }
        match self.rng.as_mut() {
            Some(rng) => {
                let mut indices = Vec::with_capacity(self.batch_size);
                while indices.len() < self.batch_size {
                    if self.cursor == self.order.len() {
                        self.order.shuffle(rng);
                        self.cursor = 0;
                    }
                    indices.push(self.order[self.cursor]);
                    self.cursor += 1;
                }
                Some(self.dataset.gather(&indices))
            }
            None => {
                if self.cursor >= self.order.len() {
                    return None;
                }
                let end = (self.cursor + self.batch_size).min(self.order.len());
                let batch = self.dataset.gather(&self.order[self.cursor..end]);
                self.cursor = end;
                Some(batch)
            }
        }
    }
}
