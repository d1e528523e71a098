use ap_types::Hyperparameters;

/// Linear warmup followed by cosine decay to zero over `decay_steps`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupCosine {
    pub base_lr: f64,
    pub warmup_steps: u64,
    pub decay_steps: u64,
}

impl WarmupCosine {
    /// Read `learning_rate` and `warmup_factor` (fraction of the step hint
    /// spent warming up). Falls back to `default_lr` and no warmup.
    pub fn from_hyperparameters(hyperparameters: &Hyperparameters, default_lr: f64, step_hint: u64) -> Self {
        let warmup_factor = hyperparameters.f64_or("warmup_factor", 0.0).clamp(0.0, 1.0);
        Self {
            base_lr: hyperparameters.f64_or("learning_rate", default_lr),
            warmup_steps: (warmup_factor * step_hint as f64) as u64,
            decay_steps: step_hint,
        }
    }

    pub fn learning_rate(&self, step: u64) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * (step + 1) as f64 / self.warmup_steps as f64;
        }
        if self.decay_steps <= self.warmup_steps {
            return self.base_lr;
        }
        let progress = ((step - self.warmup_steps) as f64
            / (self.decay_steps - self.warmup_steps) as f64)
            .min(1.0);
        0.5 * self.base_lr * (1.0 + (std::f64::consts::PI * progress).cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap_types::ParameterValue;

    #[test]
    fn warmup_then_decay() {
        let schedule = WarmupCosine {
            base_lr: 1.0,
            warmup_steps: 10,
            decay_steps: 110,
        };
        assert!((schedule.learning_rate(0) - 0.1).abs() < 1e-12);
        assert!((schedule.learning_rate(9) - 1.0).abs() < 1e-12);
        assert!((schedule.learning_rate(10) - 1.0).abs() < 1e-12);
        assert!((schedule.learning_rate(60) - 0.5).abs() < 1e-12);
        assert!(schedule.learning_rate(110).abs() < 1e-12);
        assert!(schedule.learning_rate(500).abs() < 1e-12);
    }

    #[test]
    fn reads_hyperparameters_with_defaults() {
        let empty = WarmupCosine::from_hyperparameters(&Hyperparameters::empty(), 0.1, 200);
        assert_eq!(empty.base_lr, 0.1);
        assert_eq!(empty.warmup_steps, 0);

        let hp = Hyperparameters::empty()
            .with("learning_rate", ParameterValue::Float(0.5))
            .with("warmup_factor", ParameterValue::Float(0.05));
        let schedule = WarmupCosine::from_hyperparameters(&hp, 0.1, 200);
        assert_eq!(schedule.base_lr, 0.5);
        assert_eq!(schedule.warmup_steps, 10);
    }
}
