use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;
use torch2tflite_pipeline::{Pipeline, PipelineConfig, Python, Toolchain};

mod logging;

fn main() {
    let cli_args = CliArgs::from_args();
    logging::init(cli_args.verbosity);

    if let Err(e) = cli_args.run() {
        log::error!("{e:?}");
        std::process::exit(1)
    }
}

/// TorchScript -> ONNX -> simplified ONNX -> TF SavedModel -> TFLite fp32,
/// then one inference on zeros to check the artifact.
#[derive(Debug, StructOpt)]
#[structopt(name = "torch2tflite")]
pub struct CliArgs {
    #[structopt(short = "v", parse(from_occurrences))]
    pub verbosity: usize,

    /// TorchScript checkpoint (.pt)
    #[structopt(long = "pt")]
    pub checkpoint: PathBuf,

    /// Input height and width
    #[structopt(long, default_value = "256")]
    pub size: usize,

    /// Python interpreter with torch, onnx, onnxsim, onnx2tf and tensorflow
    #[structopt(long, default_value = "python3")]
    pub python: PathBuf,

    /// Raw ONNX export
    #[structopt(long, default_value = "unet_pet.onnx")]
    pub onnx: PathBuf,

    /// Simplified ONNX graph
    #[structopt(long = "onnx-simplified", default_value = "unet_pet_simp.onnx")]
    pub onnx_simplified: PathBuf,

    /// onnx2tf output directory
    #[structopt(long = "tf-dir", default_value = "unet_tf")]
    pub tf_dir: PathBuf,

    /// Final TFLite model
    #[structopt(long, default_value = "unet_pet_fp32.tflite")]
    pub tflite: PathBuf,

    /// Print the run summary as JSON on stdout
    #[structopt(long = "machine-friendly")]
    pub machine_friendly: bool,
}

impl CliArgs {
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig {
            size: self.size,
            raw_onnx: self.onnx.clone(),
            simplified_onnx: self.onnx_simplified.clone(),
            tf_dir: self.tf_dir.clone(),
            tflite: self.tflite.clone(),
            ..PipelineConfig::new(&self.checkpoint)
        }
    }

    pub fn run(&self) -> Result<()> {
        let python = Python::new(&self.python);
        let mut pipeline = Pipeline::new(self.config(), Toolchain::python(&python));
        if self.machine_friendly {
            // stdout only carries the JSON summary
            pipeline = pipeline.with_progress(std::io::stderr());
        }
        let summary = pipeline.run()?;
        if self.machine_friendly {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = CliArgs::from_iter(["torch2tflite", "--pt", "model.pt"]);
        let config = args.config();
        assert_eq!(config.checkpoint, PathBuf::from("model.pt"));
        assert_eq!(config.size, 256);
        assert_eq!(config, PipelineConfig::new("model.pt"));
        assert_eq!(args.python, PathBuf::from("python3"));
        assert!(!args.machine_friendly);
    }

    #[test]
    fn overrides() {
        let args = CliArgs::from_iter([
            "torch2tflite",
            "--pt",
            "m.pt",
            "--size",
            "128",
            "--tflite",
            "out/m.tflite",
            "-vv",
        ]);
        assert_eq!(args.size, 128);
        assert_eq!(args.verbosity, 2);
        assert_eq!(args.config().tflite, PathBuf::from("out/m.tflite"));
    }

    #[test]
    fn checkpoint_is_required() {
        assert!(CliArgs::from_iter_safe(["torch2tflite", "--size", "256"]).is_err());
    }
}
