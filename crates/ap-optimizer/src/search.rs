//! Search space definitions and quasi-random hyperparameter generation.

use ap_types::{ApResult, Hyperparameters, ParameterValue, SearchSpaceError};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A single hyperparameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Hyperparameter name (e.g. "learning_rate").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes how a dimension is sampled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous range [min, max], interpolated linearly.
    Linear { min: f64, max: f64 },
    /// Continuous range [min, max], interpolated in log-space then exponentiated.
    Log { min: f64, max: f64 },
    /// Discrete set of allowed values.
    FeasiblePoints { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    /// Map a unit-interval coordinate onto this dimension.
    fn interpolate(&self, u: f64) -> ParameterValue {
        match self {
            Self::Linear { min, max } => ParameterValue::Float(min + u * (max - min)),
            Self::Log { min, max } => {
                let log_min = min.ln();
                let log_max = max.ln();
                ParameterValue::Float((log_min + u * (log_max - log_min)).exp())
            }
            Self::FeasiblePoints { values } => {
                let idx = ((u * values.len() as f64) as usize).min(values.len() - 1);
                ParameterValue::from_json(&values[idx])
            }
        }
    }

    /// True when every sample of this dimension is the same value.
    fn is_fixed(&self) -> bool {
        match self {
            Self::Linear { min, max } | Self::Log { min, max } => min == max,
            Self::FeasiblePoints { values } => values.len() == 1,
        }
    }
}

/// The full search space, kept sorted by dimension name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        let name = name.into();
        self.parameters.retain(|p| p.name != name);
        self.parameters.push(ParameterDef { name, kind });
        self.parameters.sort_by(|a, b| a.name.cmp(&b.name));
        self
    }

    pub fn add_linear(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.push(name, ParameterKind::Linear { min, max })
    }

    pub fn add_log(self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.push(name, ParameterKind::Log { min, max })
    }

    pub fn add_feasible_points(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::FeasiblePoints { values })
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Number of dimensions that can take more than one value.
    pub fn degrees_of_freedom(&self) -> usize {
        self.parameters.iter().filter(|p| !p.kind.is_fixed()).count()
    }

    /// Parse the search-space file format:
    ///
    /// ```json
    /// {
    ///   "learning_rate": {"min": 1e-4, "max": 1e-1, "scaling": "log"},
    ///   "beta1": {"feasible_points": [0.9]}
    /// }
    /// ```
    pub fn from_json_value(value: &serde_json::Value) -> ApResult<Self> {
        let object = value.as_object().ok_or(SearchSpaceError::NotAnObject)?;
        let mut space = Self::new();
        for (name, dim) in object {
            space = space.push(name.clone(), parse_dimension(name, dim)?);
        }
        space.validate()?;
        Ok(space)
    }

    pub fn from_json_str(json: &str) -> ApResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json_value(&value)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ApResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        debug!("Loaded search space from {}", path.as_ref().display());
        Self::from_json_str(&contents)
    }

    /// Check every dimension is well formed and the space is non-empty.
    pub fn validate(&self) -> ApResult<()> {
        if self.parameters.is_empty() {
            return Err(SearchSpaceError::Empty.into());
        }
        for param in &self.parameters {
            let malformed = |message: &str| SearchSpaceError::Malformed {
                name: param.name.clone(),
                message: message.to_string(),
            };
            match &param.kind {
                ParameterKind::Linear { min, max } | ParameterKind::Log { min, max } => {
                    if !min.is_finite() || !max.is_finite() {
                        return Err(malformed("bounds must be finite").into());
                    }
                    if min > max {
                        return Err(malformed("min is greater than max").into());
                    }
                    if matches!(param.kind, ParameterKind::Log { .. }) && *min <= 0.0 {
                        return Err(malformed("log scaling needs a positive min").into());
                    }
                }
                ParameterKind::FeasiblePoints { values } => {
                    if values.is_empty() {
                        return Err(malformed("feasible_points is empty").into());
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_dimension(name: &str, dim: &serde_json::Value) -> ApResult<ParameterKind> {
    let malformed = |message: String| SearchSpaceError::Malformed {
        name: name.to_string(),
        message,
    };
    let fields = dim
        .as_object()
        .ok_or_else(|| malformed("expected an object".to_string()))?;

    if let Some(points) = fields.get("feasible_points") {
        let values = points
            .as_array()
            .ok_or_else(|| malformed("feasible_points must be an array".to_string()))?;
        return Ok(ParameterKind::FeasiblePoints {
            values: values.clone(),
        });
    }

    let bound = |key: &str| {
        fields
            .get(key)
            .and_then(serde_json::Value::as_f64)
            .ok_or_else(|| malformed(format!("missing numeric `{key}`")))
    };
    let min = bound("min")?;
    let max = bound("max")?;
    let scaling = fields
        .get("scaling")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| malformed("missing `scaling`".to_string()))?;

    match scaling {
        "linear" => Ok(ParameterKind::Linear { min, max }),
        "log" => Ok(ParameterKind::Log { min, max }),
        other => Err(malformed(format!("unknown scaling `{other}`")).into()),
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for hyperparameter generators.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of hyperparameter settings.
    fn suggest(&mut self, count: usize) -> Vec<Hyperparameters>;

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

/// Tuning knobs of the Halton generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltonOptions {
    /// Leading sequence points to discard.
    pub skip: u64,
    /// Seed of the digit-permutation scramble.
    pub seed: u64,
}

impl Default for HaltonOptions {
    fn default() -> Self {
        Self { skip: 100, seed: 0 }
    }
}

/// Scrambled Halton sequence over a search space.
///
/// Dimension `d` uses the `d`-th prime as its base. Digits are scrambled by a
/// fixed permutation per dimension that keeps 0 in place, so distinct indices
/// always produce distinct coordinates. Expects a space that passed
/// [`SearchSpace::validate`].
#[derive(Debug, Clone)]
pub struct HaltonSearch {
    space: SearchSpace,
    bases: Vec<u64>,
    permutations: Vec<Vec<u64>>,
    cursor: u64,
}

impl HaltonSearch {
    pub fn new(space: SearchSpace) -> Self {
        Self::with_options(space, HaltonOptions::default())
    }

    pub fn with_options(space: SearchSpace, options: HaltonOptions) -> Self {
        let bases = first_primes(space.len());
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        let permutations = bases
            .iter()
            .map(|&base| {
                let mut digits: Vec<u64> = (1..base).collect();
                digits.shuffle(&mut rng);
                std::iter::once(0).chain(digits).collect()
            })
            .collect();
        Self {
            space,
            bases,
            permutations,
            cursor: options.skip,
        }
    }

    fn radical_inverse(&self, dim: usize, mut index: u64) -> f64 {
        let base = self.bases[dim];
        let perm = &self.permutations[dim];
        let inv_base = 1.0 / base as f64;
        let mut factor = inv_base;
        let mut value = 0.0;
        while index > 0 {
            value += perm[(index % base) as usize] as f64 * factor;
            index /= base;
            factor *= inv_base;
        }
        value
    }

    fn point(&self, index: u64) -> Hyperparameters {
        let values: BTreeMap<String, ParameterValue> = self
            .space
            .parameters
            .iter()
            .enumerate()
            .map(|(dim, param)| {
                let u = self.radical_inverse(dim, index);
                (param.name.clone(), param.kind.interpolate(u))
            })
            .collect();
        Hyperparameters::new(values)
    }
}

impl SearchStrategy for HaltonSearch {
    fn suggest(&mut self, count: usize) -> Vec<Hyperparameters> {
        let start = self.cursor;
        self.cursor += count as u64;
        (start..self.cursor).map(|i| self.point(i)).collect()
    }

    fn name(&self) -> &str {
        "halton"
    }
}

fn first_primes(n: usize) -> Vec<u64> {
    let mut primes: Vec<u64> = Vec::with_capacity(n);
    let mut candidate = 2u64;
    while primes.len() < n {
        if primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
        {
            primes.push(candidate);
        }
        candidate += 1;
    }
    primes
}

/// Generate exactly `num_trials` hyperparameter settings from `space`.
pub fn generate_search(space: &SearchSpace, num_trials: usize) -> ApResult<Vec<Hyperparameters>> {
    generate_search_with(space, num_trials, HaltonOptions::default())
}

pub fn generate_search_with(
    space: &SearchSpace,
    num_trials: usize,
    options: HaltonOptions,
) -> ApResult<Vec<Hyperparameters>> {
    space.validate()?;
    if num_trials == 0 {
        return Err(SearchSpaceError::NoTrials.into());
    }
    let mut search = HaltonSearch::with_options(space.clone(), options);
    let settings = search.suggest(num_trials);
    debug!(
        "Generated {} settings over {} dimensions ({} free)",
        settings.len(),
        space.len(),
        space.degrees_of_freedom()
    );
    Ok(settings)
}
