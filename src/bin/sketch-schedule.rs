//! Noise-schedule inspector.
//!
//! Rebuilds the schedule a sketch model was trained with, from flags or a
//! JSON config saved beside the checkpoint, and prints a one-line JSON
//! summary to stdout:
//!
//! ```json
//! {"num_train_timesteps":1000,"beta_schedule":"linear","variance_type":"small",
//!  "beta_first":0.0001,"beta_last":0.02,"alpha_cumprod_last":4.0e-5,...}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use clap::Parser;
use sketch_diffusion::config::{BetaSchedule, ScheduleConfig, VarianceType};
use sketch_diffusion::pipeline::ddim_timesteps;
use sketch_diffusion::scheduler::DdpmScheduler;

#[derive(Parser, Debug)]
#[command(
    name = "sketch-schedule",
    about = "Inspect a sketch-diffusion noise schedule",
    long_about = "Build a DDPM noise schedule from flags or a JSON config file\n\
                  and print a JSON summary line to stdout."
)]
struct Args {
    /// JSON schedule config. Overrides the schedule flags below.
    #[arg(long)]
    config: Option<String>,

    /// Number of training timesteps.
    #[arg(long, short = 't', default_value_t = 1000)]
    timesteps: usize,

    /// Beta at the first timestep.
    #[arg(long, default_value_t = 1e-4)]
    beta_start: f64,

    /// Beta at the last timestep.
    #[arg(long, default_value_t = 0.02)]
    beta_end: f64,

    /// Beta curve: linear or quad.
    #[arg(long, default_value = "linear")]
    beta_schedule: BetaSchedule,

    /// Reverse-step variance: small or large.
    #[arg(long, default_value = "small")]
    variance_type: VarianceType,

    /// Also print the subsampled timestep sequence for this many steps.
    #[arg(long, short = 'n')]
    inference_steps: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading schedule config from {path}");
            ScheduleConfig::from_json_file(path)
                .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?
        }
        None => ScheduleConfig {
            num_train_timesteps: args.timesteps,
            beta_start: args.beta_start,
            beta_end: args.beta_end,
            beta_schedule: args.beta_schedule,
            variance_type: args.variance_type,
        },
    };

    let scheduler = DdpmScheduler::new(config.clone(), &candle_core::Device::Cpu)
        .map_err(|e| anyhow::anyhow!("failed to build schedule: {e}"))?;
    let schedule = scheduler.schedule();
    let last = schedule.len() - 1;

    let inference = args
        .inference_steps
        .map(|n| ddim_timesteps(schedule.len(), n))
        .transpose()
        .map_err(|e| anyhow::anyhow!("bad --inference-steps: {e}"))?;

    tracing::info!(
        "Built {}-step {} schedule",
        schedule.len(),
        config.beta_schedule
    );

    let summary = serde_json::json!({
        "num_train_timesteps": schedule.len(),
        "beta_schedule": config.beta_schedule,
        "variance_type": config.variance_type,
        "beta_first": schedule.betas()[0],
        "beta_last": schedule.betas()[last],
        "alpha_cumprod_first": schedule.alphas_cumprod()[0],
        "alpha_cumprod_last": schedule.alphas_cumprod()[last],
        "sigma_last": schedule.sigmas()[last],
        "inference_timesteps": inference,
    });
    println!("{summary}");

    Ok(())
}
