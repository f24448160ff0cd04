use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use serde::Serialize;
use tract_core::internal::*;

use crate::export::{self, ExportRequest, GraphExporter};
use crate::inspect::{self, GraphSummary};
use crate::package::{self, FlatbufferConverter, Packaged, TfLiteConverter};
use crate::python::Python;
use crate::sanity::{Interpreter, SanityChecker, SanityReport};
use crate::simplify::{self, OnnxSim, Simplifier};
use crate::translate::{self, Onnx2Tf, Translator};

/// Where a run stands. Stages only move forward; a failure ends the run in
/// whatever stage it was in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Exported,
    Simplified,
    Translated,
    Packaged,
    Verified,
}

impl Stage {
    /// The step that leads out of this stage.
    pub fn next_step(&self) -> &'static str {
        match self {
            Stage::Start => "ONNX export",
            Stage::Exported => "ONNX simplification",
            Stage::Simplified => "ONNX to TensorFlow translation",
            Stage::Translated => "TFLite packaging",
            Stage::Packaged => "sanity check",
            Stage::Verified => "nothing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    pub checkpoint: PathBuf,
    pub size: usize,
    pub raw_onnx: PathBuf,
    pub simplified_onnx: PathBuf,
    pub tf_dir: PathBuf,
    pub tflite: PathBuf,
    pub input_name: String,
    pub output_name: String,
    pub opset: u32,
}

impl PipelineConfig {
    pub const DEFAULT_SIZE: usize = 256;

    pub fn new(checkpoint: impl Into<PathBuf>) -> PipelineConfig {
        PipelineConfig {
            checkpoint: checkpoint.into(),
            size: Self::DEFAULT_SIZE,
            raw_onnx: export::DEFAULT_RAW_ONNX.into(),
            simplified_onnx: simplify::DEFAULT_SIMPLIFIED_ONNX.into(),
            tf_dir: translate::DEFAULT_TF_DIR.into(),
            tflite: package::DEFAULT_TFLITE.into(),
            input_name: export::DEFAULT_INPUT_NAME.into(),
            output_name: export::DEFAULT_OUTPUT_NAME.into(),
            opset: export::DEFAULT_OPSET,
        }
    }

    pub fn export_request(&self) -> ExportRequest {
        ExportRequest {
            checkpoint: self.checkpoint.clone(),
            size: self.size,
            output: self.raw_onnx.clone(),
            input_name: self.input_name.clone(),
            output_name: self.output_name.clone(),
            opset: self.opset,
        }
    }
}

/// The external collaborators, one per stage.
pub struct Toolchain {
    pub exporter: GraphExporter,
    pub simplifier: Box<dyn Simplifier>,
    pub translator: Box<dyn Translator>,
    pub converter: Box<dyn FlatbufferConverter>,
    pub interpreter: Box<dyn Interpreter>,
}

impl Toolchain {
    /// Every stage through `python`. The sanity check falls back on tract
    /// when tensorflow can not run the artifact.
    pub fn python(python: &Python) -> Toolchain {
        Toolchain {
            exporter: GraphExporter::python(python),
            simplifier: Box::new(OnnxSim(python.clone())),
            translator: Box::new(Onnx2Tf(python.clone())),
            converter: Box::new(TfLiteConverter(python.clone())),
            interpreter: Box::new(SanityChecker::python(python)),
        }
    }
}

/// Everything a completed run produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunSummary {
    pub raw_onnx: PathBuf,
    pub simplified_onnx: PathBuf,
    pub tf_dir: PathBuf,
    pub exported: Option<GraphSummary>,
    pub simplified: Option<GraphSummary>,
    pub packaged: Packaged,
    pub megabytes: f64,
    pub sanity: SanityReport,
    pub stages: Vec<Stage>,
}

pub struct Pipeline {
    config: PipelineConfig,
    toolchain: Toolchain,
    inspect_graphs: bool,
    progress: Box<dyn Write>,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, toolchain: Toolchain) -> Pipeline {
        Pipeline {
            config,
            toolchain,
            inspect_graphs: true,
            progress: Box::new(std::io::stdout()),
            stages: vec![Stage::Start],
        }
    }

    /// Where the human progress lines go. Defaults to stdout.
    pub fn with_progress(self, progress: impl Write + 'static) -> Pipeline {
        Pipeline { progress: Box::new(progress), ..self }
    }

    /// Skips the tract-onnx diagnostics on exported graphs.
    pub fn without_graph_inspection(self) -> Pipeline {
        Pipeline { inspect_graphs: false, ..self }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage(&self) -> Stage {
        *self.stages.last().unwrap_or(&Stage::Start)
    }

    /// Stages reached so far, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    fn reach(&mut self, stage: Stage) {
        debug_assert!(stage > self.stage());
        info!("{} -> {}", self.stage(), stage);
        self.stages.push(stage);
    }

    fn inspect(&self, path: &std::path::Path) -> Option<GraphSummary> {
        if !self.inspect_graphs {
            return None;
        }
        inspect::check_exported(path, &self.config.input_name, &self.config.output_name, self.config.opset)
    }

    /// Runs every stage in order, stopping at the first failure. Each call
    /// starts over from `Stage::Start`.
    pub fn run(&mut self) -> TractResult<RunSummary> {
        self.stages = vec![Stage::Start];
        self.run_stages().map_err(|e| {
            let stage = self.stage();
            e.context(format!("Conversion failed during {} (reached {stage})", stage.next_step()))
        })
    }

    fn run_stages(&mut self) -> TractResult<RunSummary> {
        writeln!(self.progress, "==> Exporting ONNX...")?;
        let raw_onnx = self.toolchain.exporter.export(&self.config.export_request())?;
        writeln!(self.progress, "Raw ONNX: {}", raw_onnx.display())?;
        let exported = self.inspect(&raw_onnx);
        self.reach(Stage::Exported);

        writeln!(self.progress, "==> Simplifying ONNX...")?;
        let simplified_onnx = simplify::simplify_graph(
            &*self.toolchain.simplifier,
            &raw_onnx,
            &self.config.simplified_onnx,
        )?;
        writeln!(self.progress, "Simplified ONNX: {}", simplified_onnx.display())?;
        let simplified = self.inspect(&simplified_onnx);
        self.reach(Stage::Simplified);

        writeln!(self.progress, "==> Converting ONNX -> TF (NHWC)...")?;
        let tf_dir =
            translate::translate_graph(&*self.toolchain.translator, &simplified_onnx, &self.config.tf_dir)?;
        let saved_model = tf_dir.join(package::SAVED_MODEL_SUBDIR);
        writeln!(self.progress, "SavedModel: {}", saved_model.display())?;
        self.reach(Stage::Translated);

        writeln!(self.progress, "==> Converting TF -> TFLite FP32...")?;
        let packaged = package::package(
            &*self.toolchain.converter,
            &tf_dir,
            &package::prebuilt_name(&simplified_onnx),
            &self.config.tflite,
        )?;
        let megabytes = packaged.megabytes();
        writeln!(self.progress, "OK: {} | size (MB): {}", packaged.path.display(), megabytes)?;
        self.reach(Stage::Packaged);

        let sanity = self.toolchain.interpreter.sanity_run(&packaged.path, self.config.size)?;
        for input in &sanity.inputs {
            writeln!(self.progress, "INPUT : {input}")?;
        }
        for output in &sanity.outputs {
            writeln!(self.progress, "OUTPUT: {output}")?;
        }
        writeln!(self.progress, "Sanity: {sanity}")?;
        self.reach(Stage::Verified);

        Ok(RunSummary {
            raw_onnx,
            simplified_onnx,
            tf_dir,
            exported,
            simplified,
            packaged,
            megabytes,
            sanity,
            stages: self.stages.clone(),
        })
    }
}
