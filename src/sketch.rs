//! Stroke-3 sketch helpers.
//!
//! The model generates `[B, L, 2]` pen offsets. Downstream rendering
//! expects stroke-3 points `(dx, dy, pen)`, with `pen = 1` meaning the pen
//! stays on the paper.

use candle_core::{D, Tensor};

use crate::{Error, Result};

/// Append a constant pen-down channel: `[B, L, 2] → [B, L, 3]`.
pub fn append_pen_state(vectors: &Tensor) -> Result<Tensor> {
    let dims = vectors.dims();
    if dims.len() != 3 {
        return Err(Error::Precondition(format!(
            "expected [batch, length, features] vectors, got shape {dims:?}"
        )));
    }
    let pen = Tensor::ones((dims[0], dims[1], 1), vectors.dtype(), vectors.device())?;
    Ok(Tensor::cat(&[vectors, &pen], D::Minus1)?)
}

/// File name for the `index`-th generated sample, e.g. `sample_000042.png`.
pub fn sample_file_name(index: usize, extension: &str) -> String {
    format!("sample_{index:06}.{extension}")
}
