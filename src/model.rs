//! Denoiser seam.
//!
//! The network that predicts noise is outside this crate; the sampler and
//! the training objective only see it through [`NoisePredictor`].

use candle_core::Tensor;

use crate::Result;

/// Class label reserved for "no condition". Real classes start at 1.
pub const NULL_CLASS_LABEL: u32 = 0;

/// A trained noise-prediction model `ε̂ = f(x_t, t, [y])`.
pub trait NoisePredictor {
    /// Predict the noise in `x_t` (shape `[B, ...]`) at per-sample
    /// timesteps `timesteps` (length `B`).
    ///
    /// `class_labels` is a `u32` tensor of shape `[B]`; `None` asks for the
    /// unconditional prediction. The result has the shape of `x_t`.
    fn predict_noise(
        &self,
        x_t: &Tensor,
        timesteps: &[usize],
        class_labels: Option<&Tensor>,
    ) -> Result<Tensor>;

    /// Whether the model was trained with label dropout, so that
    /// classifier-free guidance is meaningful.
    fn supports_guidance(&self) -> bool {
        false
    }
}

impl<P: NoisePredictor + ?Sized> NoisePredictor for &P {
    fn predict_noise(
        &self,
        x_t: &Tensor,
        timesteps: &[usize],
        class_labels: Option<&Tensor>,
    ) -> Result<Tensor> {
        (**self).predict_noise(x_t, timesteps, class_labels)
    }

    fn supports_guidance(&self) -> bool {
        (**self).supports_guidance()
    }
}

impl<P: NoisePredictor + ?Sized> NoisePredictor for Box<P> {
    fn predict_noise(
        &self,
        x_t: &Tensor,
        timesteps: &[usize],
        class_labels: Option<&Tensor>,
    ) -> Result<Tensor> {
        (**self).predict_noise(x_t, timesteps, class_labels)
    }

    fn supports_guidance(&self) -> bool {
        (**self).supports_guidance()
    }
}
