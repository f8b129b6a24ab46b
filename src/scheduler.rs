//! DDPM/DDIM noise-schedule engine.
//!
//! - [`schedule`] — the immutable per-timestep table (β, α, ᾱ, σ) and
//!   coefficient gathering
//! - [`ddpm`] — the engine: forward noising and the ancestral reverse step
//! - [`ddim`] — the subsampled (non-Markovian) reverse step
//! - [`noise`] — seeded standard-normal tensors
//!
//! ## Formulation
//!
//! The forward process jumps straight from data to step `t`:
//! `x_t = √ᾱ_t · x_0 + √(1 - ᾱ_t) · ε`
//!
//! The denoiser predicts `ε`. The ancestral step inverts one native step:
//! `x_{t-1} = (x_t - (1 - α_t) / √(1 - ᾱ_t) · ε̂) / √α_t + σ_t · z`
//!
//! The subsampled step can jump from `t` to any earlier `t_prev`, with
//! `η` scaling the injected noise from 0 (deterministic) to 1.

pub mod ddim;
pub mod ddpm;
pub mod noise;
pub mod schedule;

pub use ddpm::DdpmScheduler;
pub use schedule::Schedule;
