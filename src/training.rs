//! Denoising training objective.
//!
//! One supervised step: pick `t ~ U[0, T-1]` per sample, noise the clean
//! sketch to `x_t` with [`DdpmScheduler::q_sample`], and regress the
//! model's noise prediction onto the injected noise.

use candle_core::Tensor;
use rand::Rng;

use crate::model::{NULL_CLASS_LABEL, NoisePredictor};
use crate::scheduler::DdpmScheduler;
use crate::{Error, Result};

/// Loss for one batch of clean sketches `x_0`.
///
/// With `class_labels`, each label is independently replaced by
/// [`NULL_CLASS_LABEL`] with probability `cfg_dropout`, so the model also
/// learns the unconditional branch used by classifier-free guidance.
///
/// Returns the scalar mean-squared error between predicted and injected
/// noise.
pub fn training_loss<P: NoisePredictor, R: Rng>(
    scheduler: &DdpmScheduler,
    model: &P,
    x_0: &Tensor,
    class_labels: Option<&[u32]>,
    cfg_dropout: f64,
    rng: &mut R,
) -> Result<Tensor> {
    if !(0.0..=1.0).contains(&cfg_dropout) {
        return Err(Error::Precondition(format!(
            "cfg_dropout must lie in [0, 1], got {cfg_dropout}"
        )));
    }
    let batch = x_0.dim(0)?;
    let labels = match class_labels {
        None => None,
        Some(labels) if labels.len() != batch => {
            return Err(Error::Precondition(format!(
                "{} class labels for a batch of {batch}",
                labels.len()
            )));
        }
        Some(labels) => {
            let dropped: Vec<u32> = labels
                .iter()
                .map(|&label| {
                    if rng.random::<f64>() < cfg_dropout {
                        NULL_CLASS_LABEL
                    } else {
                        label
                    }
                })
                .collect();
            Some(Tensor::from_vec(dropped, batch, x_0.device())?)
        }
    };

    let timesteps = scheduler.uniform_sample_t(batch, rng);
    let (x_t, eps) = scheduler.q_sample(x_0, &timesteps, None, rng)?;
    let noise_pred = model.predict_noise(&x_t, &timesteps, labels.as_ref())?;

    let loss = candle_nn::loss::mse(&noise_pred, &eps)?;
    Ok(loss)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use candle_core::{DType, Device};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::cell::RefCell;

    /// Recovers ε exactly from x_t when x_0 is known to be zero.
    struct ZeroDataOracle {
        alphas_cumprod: Vec<f64>,
        seen_labels: RefCell<Vec<u32>>,
    }

    impl NoisePredictor for ZeroDataOracle {
        fn predict_noise(
            &self,
            x_t: &Tensor,
            timesteps: &[usize],
            class_labels: Option<&Tensor>,
        ) -> Result<Tensor> {
            if let Some(labels) = class_labels {
                self.seen_labels.borrow_mut().extend(labels.to_vec1::<u32>()?);
            }
            let scale: Vec<f32> = timesteps
                .iter()
                .map(|&t| (1.0 / (1.0 - self.alphas_cumprod[t]).sqrt()) as f32)
                .collect();
            let scale = Tensor::from_vec(scale, (timesteps.len(), 1, 1), x_t.device())?;
            Ok(x_t.broadcast_mul(&scale)?)
        }
    }

    fn setup() -> (DdpmScheduler, ZeroDataOracle) {
        let scheduler = DdpmScheduler::new(ScheduleConfig::default(), &Device::Cpu).unwrap();
        let oracle = ZeroDataOracle {
            alphas_cumprod: scheduler.schedule().alphas_cumprod().to_vec(),
            seen_labels: RefCell::new(Vec::new()),
        };
        (scheduler, oracle)
    }

    #[test]
    fn perfect_predictor_has_near_zero_loss() {
        let (scheduler, oracle) = setup();
        let x_0 = Tensor::zeros((8, 32, 2), DType::F32, &Device::Cpu).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let loss: f32 = training_loss(&scheduler, &oracle, &x_0, None, 0.0, &mut rng)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(loss < 1e-6, "loss = {loss}");
    }

    #[test]
    fn zero_predictor_loss_is_noise_variance() {
        struct Zero;
        impl NoisePredictor for Zero {
            fn predict_noise(&self, x_t: &Tensor, _: &[usize], _: Option<&Tensor>) -> Result<Tensor> {
                Ok(Tensor::zeros_like(x_t)?)
            }
        }
        let (scheduler, _) = setup();
        let x_0 = Tensor::ones((16, 64, 2), DType::F32, &Device::Cpu).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let loss: f32 = training_loss(&scheduler, &Zero, &x_0, None, 0.0, &mut rng)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!((loss - 1.0).abs() < 0.1, "loss = {loss}");
    }

    #[test]
    fn full_dropout_nulls_every_label() {
        let (scheduler, oracle) = setup();
        let x_0 = Tensor::zeros((4, 8, 2), DType::F32, &Device::Cpu).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        training_loss(&scheduler, &oracle, &x_0, Some(&[1, 2, 3, 1]), 1.0, &mut rng).unwrap();
        assert_eq!(*oracle.seen_labels.borrow(), vec![NULL_CLASS_LABEL; 4]);

        oracle.seen_labels.borrow_mut().clear();
        training_loss(&scheduler, &oracle, &x_0, Some(&[1, 2, 3, 1]), 0.0, &mut rng).unwrap();
        assert_eq!(*oracle.seen_labels.borrow(), vec![1, 2, 3, 1]);
    }

    #[test]
    fn rejects_bad_arguments() {
        let (scheduler, oracle) = setup();
        let x_0 = Tensor::zeros((2, 8, 2), DType::F32, &Device::Cpu).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            training_loss(&scheduler, &oracle, &x_0, None, 1.5, &mut rng),
            Err(Error::Precondition(_))
        ));
        assert!(matches!(
            training_loss(&scheduler, &oracle, &x_0, Some(&[1]), 0.1, &mut rng),
            Err(Error::Precondition(_))
        ));
    }
}
