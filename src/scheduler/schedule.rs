//! Variance schedule table and per-sample coefficient gathering.

use candle_core::Tensor;

use crate::config::{BetaSchedule, ScheduleConfig, VarianceType};
use crate::{Error, Result};

/// Per-timestep constants, indexed `0..T`. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct Schedule {
    betas: Vec<f64>,
    alphas: Vec<f64>,
    alphas_cumprod: Vec<f64>,
    sigmas: Vec<f64>,
    variance_type: VarianceType,
}

impl Schedule {
    /// Build the table from a validated config.
    pub fn new(config: &ScheduleConfig) -> Result<Self> {
        config.validate()?;
        let n = config.num_train_timesteps;

        let betas = match config.beta_schedule {
            BetaSchedule::Linear => linspace(config.beta_start, config.beta_end, n),
            BetaSchedule::Quad => linspace(config.beta_start.sqrt(), config.beta_end.sqrt(), n)
                .into_iter()
                .map(|b| b * b)
                .collect(),
        };

        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();

        let mut alphas_cumprod = Vec::with_capacity(n);
        let mut acc = 1.0_f64;
        for &alpha in &alphas {
            acc *= alpha;
            alphas_cumprod.push(acc);
        }

        let sigmas = match config.variance_type {
            VarianceType::Small => (0..n)
                .map(|t| {
                    // ᾱ_{-1} := 1, so σ_0 = 0.
                    let prev = if t == 0 { 1.0 } else { alphas_cumprod[t - 1] };
                    ((1.0 - prev) / (1.0 - alphas_cumprod[t]) * betas[t]).sqrt()
                })
                .collect(),
            VarianceType::Large => betas.iter().map(|b| b.sqrt()).collect(),
        };

        Ok(Self {
            betas,
            alphas,
            alphas_cumprod,
            sigmas,
            variance_type: config.variance_type,
        })
    }

    /// Number of timesteps `T`.
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    pub fn alphas_cumprod(&self) -> &[f64] {
        &self.alphas_cumprod
    }

    pub fn sigmas(&self) -> &[f64] {
        &self.sigmas
    }

    pub fn variance_type(&self) -> VarianceType {
        self.variance_type
    }

    /// Reject a timestep outside `[0, T-1]`.
    pub fn check_timestep(&self, t: usize) -> Result<()> {
        if t >= self.len() {
            return Err(Error::Precondition(format!(
                "timestep {t} out of range for a {}-step schedule",
                self.len()
            )));
        }
        Ok(())
    }
}

/// `steps` evenly spaced values from `start` to `end` inclusive.
pub(crate) fn linspace(start: f64, end: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let delta = (end - start) / (steps - 1) as f64;
            (0..steps)
                .map(|i| {
                    if i == steps - 1 {
                        end
                    } else {
                        start + delta * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Select `consts[t_i]` for each sample and shape the result `[B, 1, ..., 1]`
/// so it broadcasts against `like` (rank and device taken from `like`).
///
/// `consts` is a rank-1 tensor; the result keeps its dtype. Timesteps must
/// already be non-negative; the `-1` sentinel is resolved by callers.
pub fn gather(consts: &Tensor, timesteps: &[usize], like: &Tensor) -> Result<Tensor> {
    let len = consts.dim(0)?;
    let batch = like.dim(0)?;
    if timesteps.len() != batch {
        return Err(Error::Precondition(format!(
            "timestep batch has {} entries for a sample batch of {batch}",
            timesteps.len()
        )));
    }
    if let Some(&t) = timesteps.iter().find(|&&t| t >= len) {
        return Err(Error::Precondition(format!(
            "timestep {t} out of range for a {len}-step schedule"
        )));
    }

    let ids: Vec<u32> = timesteps.iter().map(|&t| t as u32).collect();
    let ids = Tensor::from_vec(ids, batch, consts.device())?;

    let mut dims = vec![1usize; like.rank()];
    dims[0] = batch;

    let gathered = consts
        .index_select(&ids, 0)?
        .reshape(dims)?
        .to_device(like.device())?;
    Ok(gathered)
}
