use std::path::PathBuf;

use anyhow::{Context, Result};
use structopt::StructOpt;
use torch2tflite_pipeline::inspect;
use torch2tflite_pipeline::mask::{self, Segmenter};

#[path = "../logging.rs"]
mod logging;

fn main() {
    let cli_args = CliArgs::from_args();
    logging::init(cli_args.verbosity);

    if let Err(e) = cli_args.command.run() {
        log::error!("{e:?}");
        std::process::exit(1)
    }
}

/// Looks at converted models.
#[derive(Debug, StructOpt)]
#[structopt(name = "tflite-probe")]
pub struct CliArgs {
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbosity: usize,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Input and output names and facts of an .onnx or .tflite model
    Inspect {
        model: PathBuf,
        /// Print as JSON
        #[structopt(long = "machine-friendly")]
        machine_friendly: bool,
    },
    /// Segmentation mask of an image, thresholded on the model's logits
    Mask {
        model: PathBuf,
        image: PathBuf,
        /// Mask output (png)
        #[structopt(long)]
        out: PathBuf,
        /// Also write the image with the mask drawn on top
        #[structopt(long)]
        overlay: Option<PathBuf>,
        #[structopt(long, default_value = "256")]
        size: usize,
        #[structopt(long, default_value = "0.5")]
        threshold: f32,
    },
}

impl Command {
    pub fn run(&self) -> Result<()> {
        match self {
            Command::Inspect { model, machine_friendly } => {
                let summary = inspect::inspect(model)?;
                if *machine_friendly {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                } else {
                    print!("{summary}");
                }
            }
            Command::Mask { model, image: image_path, out, overlay, size, threshold } => {
                let segmenter = Segmenter::for_path(model, *size)?;
                let picture = image::open(image_path)
                    .with_context(|| format!("Opening image {image_path:?}"))?
                    .to_rgb8();
                let predicted = segmenter.predict_mask(&picture, *threshold)?;
                predicted.save(out).with_context(|| format!("Writing mask {out:?}"))?;
                log::info!("Mask written to {out:?}");
                if let Some(overlay) = overlay {
                    mask::overlay_on(&picture, &predicted)
                        .save(overlay)
                        .with_context(|| format!("Writing overlay {overlay:?}"))?;
                    log::info!("Overlay written to {overlay:?}");
                }
            }
        }
        Ok(())
    }
}
