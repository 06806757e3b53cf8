//! Reverie CLI - synthesize the image that maximally excites a neuron.

use anyhow::{bail, Result};
use clap::Parser;
use reverie::config::ReverieConfig;
use reverie::model::conv::ConvStack;
use reverie::model::{layer_info, Model, INCEPTION_V1_LAYERS};
use reverie::render::{render, RenderRequest, STEPS};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "reverie")]
#[command(about = "Visualize what individual neurons in a network respond to")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "reverie.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Render the visualization for one layer/neuron target
    Generate {
        /// Layer to visualize (see `reverie layers`)
        #[arg(short, long)]
        layer: String,

        /// Neuron (channel) index within the layer
        #[arg(short, long, default_value = "0")]
        neuron: usize,

        /// Output side length; multiple of 128 in [128, 1024]
        #[arg(long)]
        size: Option<usize>,

        /// Disable the jitter/scale/rotate robustness transforms
        #[arg(long)]
        no_transforms: bool,

        /// Lower bound of the random scale range
        #[arg(long)]
        transform_min: Option<f32>,

        /// Upper bound of the random scale range
        #[arg(long)]
        transform_max: Option<f32>,

        /// Seed for the render (derived from the request when omitted)
        #[arg(short = 'S', long)]
        seed: Option<u64>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also save the request parameters as JSON
        #[arg(long)]
        save_meta: bool,
    },

    /// List the advertised layers and their channel counts
    Layers,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reverie=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = ReverieConfig::load(Path::new(&cli.config))?;

    match cli.command {
        Commands::Generate {
            layer,
            neuron,
            size,
            no_transforms,
            transform_min,
            transform_max,
            seed,
            output,
            save_meta,
        } => {
            let size = size.unwrap_or(config.render.size);
            validate_size(size)?;

            let Some(info) = layer_info(&layer) else {
                bail!(
                    "unknown layer '{}'; run `reverie layers` for the supported list",
                    layer
                );
            };
            if neuron >= info.channels {
                bail!(
                    "neuron {} out of range for {} (max {})",
                    neuron,
                    info.id,
                    info.channels - 1
                );
            }

            let model = ConvStack::demo(config.model.seed);
            let model_channels = model
                .layer_channels(&layer)
                .ok_or_else(|| anyhow::anyhow!("demo model does not provide layer '{layer}'"))?;
            if neuron >= model_channels {
                bail!(
                    "demo model only carries {} channels for {}; pick a neuron below that",
                    model_channels,
                    layer
                );
            }

            let request = RenderRequest {
                layer_id: layer,
                neuron_index: neuron,
                size,
                use_transforms: resolve_use_transforms(no_transforms, config.render.use_transforms),
                transform_min: transform_min.unwrap_or(config.render.transform_min),
                transform_max: transform_max.unwrap_or(config.render.transform_max),
                seed,
            };

            println!(
                "Rendering {}:{} at {}x{} ({} steps, seed {})...",
                request.layer_id,
                request.neuron_index,
                size,
                size,
                STEPS,
                request.derived_seed()
            );

            let img = render(&model, &request)?;

            let output_dir = PathBuf::from(&config.output.directory);
            fs::create_dir_all(&output_dir)?;

            let output_path = output.unwrap_or_else(|| {
                output_dir.join(format!(
                    "reverie_{}_{}.png",
                    request.layer_id, request.neuron_index
                ))
            });

            img.save(&output_path)?;
            println!("Saved to {}", output_path.display());

            if save_meta || config.output.save_meta {
                let meta_path = output_path.with_extension("json");
                let meta = serde_json::json!({
                    "request": request,
                    "seed": request.derived_seed(),
                    "steps": STEPS,
                });
                fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;
                println!("Saved metadata to {}", meta_path.display());
            }
        }

        Commands::Layers => {
            println!("Supported layers (neuron must be below the channel count):");
            for layer in &INCEPTION_V1_LAYERS {
                println!("  {:<10} max:{}", layer.id, layer.channels);
            }
        }
    }

    Ok(())
}

fn validate_size(size: usize) -> Result<()> {
    if size < 128 || size > 1024 || size % 128 != 0 {
        bail!("size must be a multiple of 128 in [128, 1024], got {}", size);
    }
    Ok(())
}

/// The transform toggle follows the config default unless the flag
/// explicitly disables it.
fn resolve_use_transforms(no_transforms: bool, config_default: bool) -> bool {
    if no_transforms {
        false
    } else {
        config_default
    }
}
