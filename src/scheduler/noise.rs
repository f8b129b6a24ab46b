//! Standard-normal noise drawn from a caller-supplied RNG.
//!
//! `Tensor::randn` uses the device generator, which cannot be seeded per
//! call. Drawing on the host from an explicit [`rand::Rng`] keeps every
//! trajectory reproducible from a single seed.

use candle_core::Tensor;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::Result;

/// Standard-normal tensor with the shape, dtype and device of `like`.
pub fn randn_like<R: Rng>(like: &Tensor, rng: &mut R) -> Result<Tensor> {
    let values: Vec<f32> = (0..like.elem_count())
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    let noise = Tensor::from_vec(values, like.dims().to_vec(), like.device())?
        .to_dtype(like.dtype())?;
    Ok(noise)
}
