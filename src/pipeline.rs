//! Sampling pipeline.
//!
//! Drives a full reverse trajectory from pure noise to stroke vectors:
//! 1. Draw `x_T ~ N(0, I)` of shape `[B, sequence_length, feature_dim]`
//! 2. Build the descending timestep sequence for the chosen method
//! 3. At each step, query the denoiser (twice under guidance) and apply the
//!    matching reverse step from [`crate::scheduler`]
//!
//! Steps run strictly in order; each one consumes the previous output.

use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::model::NoisePredictor;
use crate::scheduler::DdpmScheduler;
use crate::scheduler::noise::randn_like;
use crate::{Error, Result};

/// Which reverse process to run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    /// Ancestral sampling over every training timestep (`η = 1`).
    Ddpm,
    /// Subsampled sampling over `num_inference_steps` timesteps.
    Ddim { num_inference_steps: usize, eta: f64 },
}

impl SamplingMethod {
    /// The stochasticity the method runs at.
    pub fn eta(&self) -> f64 {
        match self {
            SamplingMethod::Ddpm => 1.0,
            SamplingMethod::Ddim { eta, .. } => *eta,
        }
    }
}

/// Parameters for one batch of sketches.
#[derive(Debug, Clone)]
pub struct SamplingParams {
    pub batch_size: usize,
    /// Points per sketch.
    pub sequence_length: usize,
    /// Values per point (2 for x/y offsets).
    pub feature_dim: usize,
    pub method: SamplingMethod,
    /// One label per sample. Required when guidance is enabled.
    pub class_labels: Option<Vec<u32>>,
    /// Classifier-free guidance scale. `None` disables guidance; `Some(0.0)`
    /// is purely unconditional.
    pub guidance_scale: Option<f64>,
    /// Random seed. `None` picks a fresh one.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            sequence_length: 96,
            feature_dim: 2,
            method: SamplingMethod::Ddpm,
            class_labels: None,
            guidance_scale: None,
            seed: None,
        }
    }
}

/// Output of a sampling run.
#[derive(Debug, Clone)]
pub struct SampledSketches {
    /// Generated vectors `[B, sequence_length, feature_dim]`.
    pub vectors: Tensor,
    /// Timesteps visited in order. Subsampled runs end with the `-1`
    /// clean-data sentinel.
    pub visited_timesteps: Vec<i64>,
}

/// Native descending sequence `T-1, T-2, ..., 0`.
pub fn ddpm_timesteps(num_train_timesteps: usize) -> Vec<usize> {
    (0..num_train_timesteps).rev().collect()
}

/// Strictly descending subsequence of `[0, T-1]` with
/// `num_inference_steps` entries, evenly strided from 0.
pub fn ddim_timesteps(num_train_timesteps: usize, num_inference_steps: usize) -> Result<Vec<usize>> {
    if num_inference_steps == 0 || num_inference_steps > num_train_timesteps {
        return Err(Error::Precondition(format!(
            "num_inference_steps must be in 1..={num_train_timesteps}, got {num_inference_steps}"
        )));
    }
    let stride = num_train_timesteps / num_inference_steps;
    Ok((0..num_inference_steps).map(|i| i * stride).rev().collect())
}

/// Classifier-free guidance: `uncond + s · (cond - uncond)`.
pub fn classifier_free_guidance(cond: &Tensor, uncond: &Tensor, scale: f64) -> Result<Tensor> {
    let guided = (uncond + ((cond - uncond)? * scale)?)?;
    Ok(guided)
}

/// Noise schedule plus denoiser.
pub struct SketchPipeline<P> {
    scheduler: DdpmScheduler,
    model: P,
}

impl<P: NoisePredictor> SketchPipeline<P> {
    pub fn new(scheduler: DdpmScheduler, model: P) -> Self {
        Self { scheduler, model }
    }

    pub fn scheduler(&self) -> &DdpmScheduler {
        &self.scheduler
    }

    pub fn model(&self) -> &P {
        &self.model
    }

    pub fn device(&self) -> &Device {
        self.scheduler.device()
    }

    /// Generate a batch of sketches, seeding a `ChaCha8Rng` from
    /// `params.seed`.
    pub fn generate(&self, params: &SamplingParams) -> Result<SampledSketches> {
        let seed = params.seed.unwrap_or_else(|| rand::rng().random());
        tracing::debug!(seed, "seeding sampler");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        self.generate_with_rng(params, &mut rng)
    }

    /// Generate a batch of sketches drawing all noise from `rng`.
    pub fn generate_with_rng<R: Rng>(
        &self,
        params: &SamplingParams,
        rng: &mut R,
    ) -> Result<SampledSketches> {
        let labels = self.prepare_labels(params)?;
        let guidance = params.guidance_scale;
        if guidance.is_some() && !self.model.supports_guidance() {
            return Err(Error::Precondition(
                "the model was not trained to support classifier-free guidance".to_string(),
            ));
        }
        if guidance.is_some() && labels.is_none() {
            return Err(Error::Precondition(
                "classifier-free guidance needs class labels".to_string(),
            ));
        }

        let shape = (params.batch_size, params.sequence_length, params.feature_dim);
        let like = Tensor::zeros(shape, candle_core::DType::F32, self.device())?;
        let mut x = randn_like(&like, rng)?;

        tracing::info!(
            batch = params.batch_size,
            method = ?params.method,
            guidance = ?guidance,
            "sampling sketches"
        );

        let t_total = self.scheduler.num_train_timesteps();
        let mut visited = Vec::new();

        match params.method {
            SamplingMethod::Ddpm => {
                for t in ddpm_timesteps(t_total) {
                    let noise_pred = self.predict(&x, t, labels.as_ref(), guidance)?;
                    x = self.scheduler.p_sample(&x, t, &noise_pred, rng)?;
                    visited.push(t as i64);
                    tracing::debug!(t, "ancestral step");
                }
            }
            SamplingMethod::Ddim {
                num_inference_steps,
                eta,
            } => {
                let mut sequence: Vec<i64> = ddim_timesteps(t_total, num_inference_steps)?
                    .into_iter()
                    .map(|t| t as i64)
                    .collect();
                sequence.push(-1);

                for pair in sequence.windows(2) {
                    let (t, t_prev) = (pair[0] as usize, pair[1]);
                    let noise_pred = self.predict(&x, t, labels.as_ref(), guidance)?;
                    x = self
                        .scheduler
                        .ddim_p_sample(&x, t, t_prev, &noise_pred, eta, rng)?;
                    visited.push(t as i64);
                    tracing::debug!(t, t_prev, "subsampled step");
                }
                visited.push(-1);
            }
        }

        tracing::info!(steps = visited.len(), "sampling finished");

        Ok(SampledSketches {
            vectors: x,
            visited_timesteps: visited,
        })
    }

    fn prepare_labels(&self, params: &SamplingParams) -> Result<Option<Tensor>> {
        match &params.class_labels {
            None => Ok(None),
            Some(labels) => {
                if labels.len() != params.batch_size {
                    return Err(Error::Precondition(format!(
                        "{} class labels for a batch of {}",
                        labels.len(),
                        params.batch_size
                    )));
                }
                let labels = Tensor::from_vec(labels.clone(), labels.len(), self.device())?;
                Ok(Some(labels))
            }
        }
    }

    /// One noise prediction for timestep `t`, guided when `guidance` is set.
    fn predict(
        &self,
        x: &Tensor,
        t: usize,
        labels: Option<&Tensor>,
        guidance: Option<f64>,
    ) -> Result<Tensor> {
        let timesteps = vec![t; x.dim(0)?];
        match guidance {
            None => self.model.predict_noise(x, &timesteps, labels),
            Some(scale) => {
                let cond = self.model.predict_noise(x, &timesteps, labels)?;
                let uncond = self.model.predict_noise(x, &timesteps, None)?;
                classifier_free_guidance(&cond, &uncond, scale)
            }
        }
    }
}
