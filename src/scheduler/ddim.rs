//! Subsampled (DDIM) reverse step.
//!
//! Jumps `x_t → x_{t_prev}` where `t_prev` may skip native timesteps, or be
//! `-1` for the clean-data endpoint (`ᾱ_{-1} = 1`, no injected noise):
//!
//! ```text
//! x̂_0   = (x_t - √(1 - ᾱ_t) · ε̂) / √ᾱ_t
//! σ     = η · √((1 - ᾱ_prev) · β_t / (1 - ᾱ_t))
//! x_prev = √ᾱ_prev · x̂_0 + √(1 - ᾱ_prev - σ²) · ε̂ + σ · z
//! ```
//!
//! The direction term reuses the predicted noise `ε̂` directly instead of
//! re-deriving it from `x̂_0`. Trained sketch models are calibrated against
//! this exact update, so it is kept as is.

use candle_core::Tensor;
use rand::Rng;

use super::ddpm::DdpmScheduler;
use super::noise::randn_like;
use super::schedule::gather;
use crate::{Error, Result};

impl DdpmScheduler {
    /// One subsampled reverse step from `t` to `t_prev` (`-1 <= t_prev < t`).
    ///
    /// `eta = 0` is deterministic; `eta = 1` matches the ancestral variance.
    /// Fails with [`Error::NumericDomain`] when `eta` is outside `[0, 1]`,
    /// `t_prev` is outside `[-1, t)` or `1 - ᾱ_prev - σ²` is negative.
    pub fn ddim_p_sample<R: Rng>(
        &self,
        x_t: &Tensor,
        t: usize,
        t_prev: i64,
        noise_pred: &Tensor,
        eta: f64,
        rng: &mut R,
    ) -> Result<Tensor> {
        self.schedule().check_timestep(t)?;
        if !(0.0..=1.0).contains(&eta) {
            return Err(Error::NumericDomain(format!(
                "eta must lie in [0, 1], got {eta}"
            )));
        }
        if t_prev < -1 || t_prev >= t as i64 {
            return Err(Error::NumericDomain(format!(
                "t_prev {t_prev} outside [-1, {t}) for step from t = {t}"
            )));
        }

        let batch = vec![t; x_t.dim(0)?];
        let acp_t = gather(&self.alphas_cumprod, &batch, x_t)?;
        let beta_t = gather(&self.betas, &batch, x_t)?;
        let acp_prev = if t_prev >= 0 {
            gather(&self.alphas_cumprod, &vec![t_prev as usize; batch.len()], x_t)?
        } else {
            Tensor::ones_like(&acp_t)?
        };

        let one_minus_acp_t = acp_t.affine(-1.0, 1.0)?;
        let one_minus_acp_prev = acp_prev.affine(-1.0, 1.0)?;

        let sigma = ((&one_minus_acp_prev * &beta_t)? / &one_minus_acp_t)?
            .sqrt()?
            .affine(eta, 0.0)?;
        let direction_var = (&one_minus_acp_prev - sigma.sqr()?)?;

        // t and t_prev are shared by the batch, so the guard runs on the host table.
        let schedule = self.schedule();
        let host_acp_prev = if t_prev >= 0 {
            schedule.alphas_cumprod()[t_prev as usize]
        } else {
            1.0
        };
        let host_sigma = eta
            * ((1.0 - host_acp_prev) * schedule.betas()[t] / (1.0 - schedule.alphas_cumprod()[t]))
                .sqrt();
        let host_var = 1.0 - host_acp_prev - host_sigma * host_sigma;
        if host_var.is_nan() || host_var < 0.0 {
            return Err(Error::NumericDomain(format!(
                "1 - alpha_cumprod[t_prev] - sigma^2 = {host_var} for t = {t}, t_prev = {t_prev}, eta = {eta}"
            )));
        }

        let noise = if t_prev >= 0 {
            randn_like(x_t, rng)?
        } else {
            Tensor::zeros_like(x_t)?
        };

        let dtype = x_t.dtype();
        let noise_scale = one_minus_acp_t.sqrt()?.to_dtype(dtype)?;
        let inv_sqrt_acp_t = acp_t.sqrt()?.recip()?.to_dtype(dtype)?;
        let sqrt_acp_prev = acp_prev.sqrt()?.to_dtype(dtype)?;
        let direction = direction_var.sqrt()?.to_dtype(dtype)?;
        let sigma = sigma.to_dtype(dtype)?;

        let x0_pred = (x_t - noise_pred.broadcast_mul(&noise_scale)?)?.broadcast_mul(&inv_sqrt_acp_t)?;
        let mean = (x0_pred.broadcast_mul(&sqrt_acp_prev)? + noise_pred.broadcast_mul(&direction)?)?;
        let x_prev = (mean + noise.broadcast_mul(&sigma)?)?;
        Ok(x_prev)
    }
}
