//! Denoising diffusion for vector sketches, on candle.
//!
//! Sketches are sequences of pen offsets `[B, L, 2]`. A denoiser trained
//! to predict the injected noise is run backwards through a fixed variance
//! schedule to turn Gaussian noise into strokes.
//!
//! ## Architecture
//!
//! ```text
//! ScheduleConfig ─→ Schedule (β, α, ᾱ, σ) ─→ DdpmScheduler
//!                                              │
//!          training:  x_0 ─ q_sample ─→ x_t ─→ NoisePredictor ─→ MSE(ε̂, ε)
//!          sampling:  x_T ─ p_sample / ddim_p_sample ─→ ... ─→ x_0
//! ```
//!
//! ## Modules
//!
//! - [`config`] — schedule scalars, curve and variance policy
//! - [`scheduler`] — schedule table, forward noising, ancestral and subsampled steps
//! - [`model`] — the [`model::NoisePredictor`] seam for the external denoiser
//! - [`pipeline`] — reverse-trajectory driver with classifier-free guidance
//! - [`training`] — the noise-regression objective
//! - [`sketch`] — stroke-3 output helpers

pub mod config;
pub mod model;
pub mod pipeline;
pub mod scheduler;
pub mod sketch;
pub mod training;

mod error;

pub use error::{Error, Result};
