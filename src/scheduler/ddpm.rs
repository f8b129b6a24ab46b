//! DDPM engine: forward noising and the ancestral reverse step.
//!
//! ```text
//! q_sample:  x_t     = √ᾱ_t · x_0 + √(1 - ᾱ_t) · ε
//! p_sample:  x_{t-1} = (x_t - (1 - α_t) / √(1 - ᾱ_t) · ε̂) / √α_t + σ_t · z
//! ```
//!
//! `z ~ N(0, I)` for `t > 0` and `z = 0` at `t = 0`, so the last step is
//! deterministic given the noise prediction.

use candle_core::{Device, Tensor};
use rand::Rng;

use super::noise::randn_like;
use super::schedule::{Schedule, gather};
use crate::config::ScheduleConfig;
use crate::{Error, Result};

/// Noise-schedule engine.
///
/// Holds the host-side [`Schedule`] and a copy of each constant array on
/// the target device. Every step takes `&self`; the engine carries no
/// per-trajectory state and can be shared across sampling threads.
#[derive(Debug, Clone)]
pub struct DdpmScheduler {
    config: ScheduleConfig,
    schedule: Schedule,
    device: Device,
    pub(super) betas: Tensor,
    pub(super) alphas: Tensor,
    pub(super) alphas_cumprod: Tensor,
    pub(super) sigmas: Tensor,
}

impl DdpmScheduler {
    /// Build the schedule and upload its constants to `device`.
    pub fn new(config: ScheduleConfig, device: &Device) -> Result<Self> {
        let schedule = Schedule::new(&config)?;

        let betas = Tensor::new(schedule.betas(), device)?;
        let alphas = Tensor::new(schedule.alphas(), device)?;
        let alphas_cumprod = Tensor::new(schedule.alphas_cumprod(), device)?;
        let sigmas = Tensor::new(schedule.sigmas(), device)?;

        tracing::info!(
            timesteps = schedule.len(),
            curve = %config.beta_schedule,
            variance = %config.variance_type,
            "built noise schedule"
        );

        Ok(Self {
            config,
            schedule,
            device: device.clone(),
            betas,
            alphas,
            alphas_cumprod,
            sigmas,
        })
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Number of training timesteps `T`.
    pub fn num_train_timesteps(&self) -> usize {
        self.schedule.len()
    }

    /// Independent uniform draws over `[0, T-1]`, one per sample.
    pub fn uniform_sample_t<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Vec<usize> {
        let n = self.num_train_timesteps();
        (0..batch_size).map(|_| rng.random_range(0..n)).collect()
    }

    /// Forward process `q(x_t | x_0)` in one closed-form jump.
    ///
    /// Draws `ε ~ N(0, I)` from `rng` when `eps` is `None`. Returns the
    /// noisy sample and the noise, which is the training target.
    pub fn q_sample<R: Rng>(
        &self,
        x_0: &Tensor,
        t: &[usize],
        eps: Option<Tensor>,
        rng: &mut R,
    ) -> Result<(Tensor, Tensor)> {
        let eps = match eps {
            Some(eps) => {
                if eps.dims() != x_0.dims() {
                    return Err(Error::Precondition(format!(
                        "noise shape {:?} does not match sample shape {:?}",
                        eps.dims(),
                        x_0.dims()
                    )));
                }
                eps
            }
            None => randn_like(x_0, rng)?,
        };

        let acp = gather(&self.alphas_cumprod, t, x_0)?;
        let signal = acp.sqrt()?.to_dtype(x_0.dtype())?;
        let noise = acp.affine(-1.0, 1.0)?.sqrt()?.to_dtype(x_0.dtype())?;

        let x_t = (x_0.broadcast_mul(&signal)? + eps.broadcast_mul(&noise)?)?;
        Ok((x_t, eps))
    }

    /// One ancestral reverse step `x_t → x_{t-1}` at native timestep `t`.
    ///
    /// `t` is shared by the whole batch. `t >= T` is rejected rather than
    /// clamped.
    pub fn p_sample<R: Rng>(
        &self,
        x_t: &Tensor,
        t: usize,
        noise_pred: &Tensor,
        rng: &mut R,
    ) -> Result<Tensor> {
        self.schedule.check_timestep(t)?;

        let z = if t == 0 {
            Tensor::zeros_like(x_t)?
        } else {
            randn_like(x_t, rng)?
        };

        let batch = vec![t; x_t.dim(0)?];
        let acp_t = gather(&self.alphas_cumprod, &batch, x_t)?;
        let alpha_t = gather(&self.alphas, &batch, x_t)?;
        let sigma_t = gather(&self.sigmas, &batch, x_t)?;

        // (1 - α_t) / √(1 - ᾱ_t)
        let eps_factor = (alpha_t.affine(-1.0, 1.0)? / acp_t.affine(-1.0, 1.0)?.sqrt()?)?;
        let inv_sqrt_alpha = alpha_t.sqrt()?.recip()?;

        let dtype = x_t.dtype();
        let eps_factor = eps_factor.to_dtype(dtype)?;
        let inv_sqrt_alpha = inv_sqrt_alpha.to_dtype(dtype)?;
        let sigma_t = sigma_t.to_dtype(dtype)?;

        let mean = (x_t - noise_pred.broadcast_mul(&eps_factor)?)?.broadcast_mul(&inv_sqrt_alpha)?;
        let sample_prev = (mean + z.broadcast_mul(&sigma_t)?)?;
        Ok(sample_prev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BetaSchedule, VarianceType};
    use candle_core::DType;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn scheduler() -> DdpmScheduler {
        DdpmScheduler::new(ScheduleConfig::default(), &Device::Cpu).unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap()
    }

    #[test]
    fn uniform_sample_t_in_range() {
        let s = scheduler();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let ts = s.uniform_sample_t(512, &mut rng);
        assert_eq!(ts.len(), 512);
        assert!(ts.iter().all(|&t| t < 1000));
        // Not degenerate.
        assert!(ts.iter().any(|&t| t < 500) && ts.iter().any(|&t| t >= 500));
    }

    #[test]
    fn q_sample_with_zero_noise_at_t0_is_identity() {
        let s = scheduler();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let x_0 = randn_like(
            &Tensor::zeros((2, 16, 2), DType::F32, &Device::Cpu).unwrap(),
            &mut rng,
        )
        .unwrap();
        let eps = Tensor::zeros_like(&x_0).unwrap();

        let (x_t, returned) = s.q_sample(&x_0, &[0, 0], Some(eps), &mut rng).unwrap();
        assert!(max_abs_diff(&x_t, &x_0) < 1e-3);
        assert_eq!(returned.dims(), x_0.dims());
    }

    #[test]
    fn q_sample_matches_closed_form_per_sample() {
        let s = scheduler();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x_0 = Tensor::ones((2, 4, 2), DType::F32, &Device::Cpu).unwrap();
        let (x_t, eps) = s.q_sample(&x_0, &[10, 900], None, &mut rng).unwrap();

        let xs = x_t.to_vec3::<f32>().unwrap();
        let es = eps.to_vec3::<f32>().unwrap();
        for (b, &t) in [10usize, 900].iter().enumerate() {
            let acp = s.schedule().alphas_cumprod()[t];
            let expected = acp.sqrt() + (1.0 - acp).sqrt() * es[b][3][1] as f64;
            assert!((xs[b][3][1] as f64 - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn q_sample_rejects_mismatched_noise() {
        let s = scheduler();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let x_0 = Tensor::ones((2, 4, 2), DType::F32, &Device::Cpu).unwrap();
        let eps = Tensor::ones((2, 5, 2), DType::F32, &Device::Cpu).unwrap();
        let result = s.q_sample(&x_0, &[1, 2], Some(eps), &mut rng);
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[test]
    fn p_sample_at_t0_is_deterministic() {
        let s = scheduler();
        let x_t = Tensor::ones((3, 8, 2), DType::F32, &Device::Cpu).unwrap();
        let noise_pred = (Tensor::ones((3, 8, 2), DType::F32, &Device::Cpu).unwrap() * 0.5).unwrap();

        let a = s
            .p_sample(&x_t, 0, &noise_pred, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        let b = s
            .p_sample(&x_t, 0, &noise_pred, &mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();
        assert_eq!(max_abs_diff(&a, &b), 0.0);
        assert_eq!(a.dims(), x_t.dims());
    }

    #[test]
    fn p_sample_mean_matches_formula() {
        let s = DdpmScheduler::new(
            ScheduleConfig {
                variance_type: VarianceType::Large,
                ..Default::default()
            },
            &Device::Cpu,
        )
        .unwrap();
        let t = 400;
        let x_t = Tensor::full(0.7f32, (1, 2, 2), &Device::Cpu).unwrap();
        let noise_pred = Tensor::full(0.3f32, (1, 2, 2), &Device::Cpu).unwrap();

        // Same seed twice: the difference to the mean is σ_t · z with identical z.
        let out = s
            .p_sample(&x_t, t, &noise_pred, &mut ChaCha8Rng::seed_from_u64(9))
            .unwrap();
        let z = randn_like(&x_t, &mut ChaCha8Rng::seed_from_u64(9)).unwrap();

        let sched = s.schedule();
        let (a, acp, sigma) = (
            sched.alphas()[t],
            sched.alphas_cumprod()[t],
            sched.sigmas()[t],
        );
        let mean = (0.7 - (1.0 - a) / (1.0 - acp).sqrt() * 0.3) / a.sqrt();
        let zs = z.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let os = out.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        for (o, z) in os.iter().zip(zs.iter()) {
            let expected = mean + sigma * *z as f64;
            assert!((*o as f64 - expected).abs() < 1e-5, "{o} vs {expected}");
        }
    }

    #[test]
    fn p_sample_injects_noise_before_t0() {
        let s = scheduler();
        let x_t = Tensor::ones((1, 8, 2), DType::F32, &Device::Cpu).unwrap();
        let noise_pred = Tensor::zeros_like(&x_t).unwrap();
        let a = s
            .p_sample(&x_t, 500, &noise_pred, &mut ChaCha8Rng::seed_from_u64(1))
            .unwrap();
        let b = s
            .p_sample(&x_t, 500, &noise_pred, &mut ChaCha8Rng::seed_from_u64(2))
            .unwrap();
        assert!(max_abs_diff(&a, &b) > 1e-3);
    }

    #[test]
    fn p_sample_rejects_out_of_range_timestep() {
        let s = scheduler();
        let x_t = Tensor::ones((1, 4, 2), DType::F32, &Device::Cpu).unwrap();
        let result = s.p_sample(&x_t, 1000, &x_t, &mut ChaCha8Rng::seed_from_u64(0));
        assert!(matches!(result, Err(Error::Precondition(_))));
    }

    #[test]
    fn quad_curve_builds() {
        let s = DdpmScheduler::new(
            ScheduleConfig {
                beta_schedule: BetaSchedule::Quad,
                ..Default::default()
            },
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(s.num_train_timesteps(), 1000);
    }
}
