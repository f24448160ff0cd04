use std::ffi::OsStr;
use std::path::Path;

use serde::Serialize;
use tract_core::internal::*;

use crate::errors::StageError;
use crate::python::{Python, ScriptOutput};

/// What one zero-input inference pass told us about an artifact. This is
/// for human inspection: nothing here is asserted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SanityReport {
    /// Which interpreter produced this report.
    pub interpreter: String,
    /// Declared input facts, as the interpreter sees them.
    pub inputs: Vec<String>,
    /// Declared output facts.
    pub outputs: Vec<String>,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
    pub output_dtype: String,
    pub min: f32,
    pub max: f32,
    pub finite: bool,
}

impl std::fmt::Display for SanityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} min/max: {} {}", self.output_shape, self.min, self.max)
    }
}

/// Loads a flat binary and runs it once on zeros of shape `(1, size, size, 3)`.
pub trait Interpreter {
    fn name(&self) -> &str;
    fn sanity_run(&self, artifact: &Path, size: usize) -> TractResult<SanityReport>;
}

pub fn nhwc_zero_shape(size: usize) -> [usize; 4] {
    [1, size, size, 3]
}

const TFLITE_SANITY: &str = r#"
import sys
import numpy as np
import tensorflow as tf
path, size = sys.argv[1], int(sys.argv[2])
interp = tf.lite.Interpreter(model_path=path)
interp.allocate_tensors()
def describe(d):
    return "%s %s %s" % (d["name"], [int(x) for x in d["shape"]], np.dtype(d["dtype"]).name)
for d in interp.get_input_details():
    print("SANITY_INPUT:", describe(d))
for d in interp.get_output_details():
    print("SANITY_OUTPUT:", describe(d))
inp = interp.get_input_details()[0]
out = interp.get_output_details()[0]
x = np.zeros((1, size, size, 3), np.float32)
interp.set_tensor(inp["index"], x)
interp.invoke()
y = interp.get_tensor(out["index"])
yf = y.astype(np.float32)
print("SANITY_INPUT_SHAPE:", ",".join(str(int(d)) for d in x.shape))
print("SANITY_OUTPUT_SHAPE:", ",".join(str(int(d)) for d in y.shape))
print("SANITY_OUTPUT_DTYPE:", y.dtype.name)
print("SANITY_MIN:", repr(float(yf.min())))
print("SANITY_MAX:", repr(float(yf.max())))
print("SANITY_FINITE:", bool(np.isfinite(yf).all()))
"#;

/// `tf.lite.Interpreter` through the conversion interpreter. It runs every
/// builtin operator the converter can emit.
#[derive(Clone, Debug)]
pub struct TfLiteInterpreter(pub Python);

fn script_value<'a>(out: &'a ScriptOutput, key: &str) -> TractResult<&'a str> {
    out.value(key).with_context(|| format!("Sanity script printed no {key} line"))
}

fn parse_shape(text: &str) -> TractResult<Vec<usize>> {
    text.split(',')
        .filter(|d| !d.trim().is_empty())
        .map(|d| d.trim().parse::<usize>().with_context(|| format!("Bad dimension {d:?} in {text:?}")))
        .collect()
}

/// Reads the `SANITY_*` lines of the TFLite sanity script.
pub(crate) fn report_from_script(out: &ScriptOutput) -> TractResult<SanityReport> {
    let float = |key: &str| -> TractResult<f32> {
        let text = script_value(out, key)?;
        text.parse::<f32>().with_context(|| format!("Bad {key} value {text:?}"))
    };
    let finite = match script_value(out, "SANITY_FINITE")? {
        "True" => true,
        "False" => false,
        other => bail!("Bad SANITY_FINITE value {other:?}"),
    };
    Ok(SanityReport {
        interpreter: "tensorflow".into(),
        inputs: out.values("SANITY_INPUT").into_iter().map(String::from).collect(),
        outputs: out.values("SANITY_OUTPUT").into_iter().map(String::from).collect(),
        input_shape: parse_shape(script_value(out, "SANITY_INPUT_SHAPE")?)?,
        output_shape: parse_shape(script_value(out, "SANITY_OUTPUT_SHAPE")?)?,
        output_dtype: script_value(out, "SANITY_OUTPUT_DTYPE")?.to_string(),
        min: float("SANITY_MIN")?,
        max: float("SANITY_MAX")?,
        finite,
    })
}

impl Interpreter for TfLiteInterpreter {
    fn name(&self) -> &str {
        "tensorflow"
    }

    fn sanity_run(&self, artifact: &Path, size: usize) -> TractResult<SanityReport> {
        let size = size.to_string();
        let out = self.0.run_script(
            "sanity",
            TFLITE_SANITY,
            [artifact.as_os_str(), OsStr::new(&size)],
        )?;
        let report = report_from_script(&out)?;
        if !report.finite {
            warn!("Sanity output contains non finite values");
        }
        Ok(report)
    }
}

/// tract's TFLite frontend. Operators it does not translate (resizes,
/// transposed convolutions) make the load fail.
#[derive(Clone, Debug, Default)]
pub struct TractTflite;

/// Range and finiteness of a tensor's values, in f32.
pub fn value_range(tensor: &Tensor) -> TractResult<(f32, f32, bool)> {
    let values = tensor.cast_to::<f32>()?;
    let values = values.as_slice::<f32>()?;
    ensure!(!values.is_empty(), "Empty output tensor");
    let finite = values.iter().all(|v| v.is_finite());
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    Ok((min, max, finite))
}

pub(crate) fn describe_facts(model: &TypedModel) -> TractResult<(Vec<String>, Vec<String>)> {
    let inputs = (0..model.inputs.len())
        .map(|ix| Ok(format!("{:?}", model.input_fact(ix)?)))
        .collect::<TractResult<Vec<_>>>()?;
    let outputs = (0..model.outputs.len())
        .map(|ix| Ok(format!("{:?}", model.output_fact(ix)?)))
        .collect::<TractResult<Vec<_>>>()?;
    Ok((inputs, outputs))
}

/// Runs an already loaded model on zeros and summarizes output 0.
pub fn sanity_run_model(model: TypedModel, size: usize) -> TractResult<SanityReport> {
    let (inputs, outputs) = describe_facts(&model)?;
    for input in &inputs {
        info!("INPUT : {input}");
    }
    for output in &outputs {
        info!("OUTPUT: {output}");
    }
    let input_shape = nhwc_zero_shape(size);
    let runnable = model
        .with_input_fact(0, f32::fact(input_shape))?
        .into_optimized()?
        .into_runnable()?;
    let zeros = Tensor::zero::<f32>(&input_shape)?;
    let result = runnable.run(tvec!(zeros.into()))?;
    let output = result.first().context("Model produced no output")?;
    let (min, max, finite) = value_range(output)?;
    let report = SanityReport {
        interpreter: "tract".into(),
        inputs,
        outputs,
        input_shape: input_shape.to_vec(),
        output_shape: output.shape().to_vec(),
        output_dtype: format!("{:?}", output.datum_type()),
        min,
        max,
        finite,
    };
    if !report.finite {
        warn!("Sanity output contains non finite values");
    }
    Ok(report)
}

impl Interpreter for TractTflite {
    fn name(&self) -> &str {
        "tract"
    }

    fn sanity_run(&self, artifact: &Path, size: usize) -> TractResult<SanityReport> {
        let model = tract_tflite::tflite()
            .model_for_path(artifact)
            .with_context(|| format!("Loading TFLite artifact {artifact:?}"))?;
        sanity_run_model(model, size)
    }
}

/// Ordered list of interpreters. The first one to run the artifact wins.
pub struct SanityChecker {
    interpreters: Vec<Box<dyn Interpreter>>,
}

impl SanityChecker {
    pub fn new(interpreters: Vec<Box<dyn Interpreter>>) -> SanityChecker {
        SanityChecker { interpreters }
    }

    /// tensorflow, then tract.
    pub fn python(python: &Python) -> SanityChecker {
        SanityChecker::new(vec![Box::new(TfLiteInterpreter(python.clone())), Box::new(TractTflite)])
    }

    pub fn interpreter_names(&self) -> Vec<&str> {
        self.interpreters.iter().map(|i| i.name()).collect()
    }
}

impl Interpreter for SanityChecker {
    fn name(&self) -> &str {
        "first-working"
    }

    fn sanity_run(&self, artifact: &Path, size: usize) -> TractResult<SanityReport> {
        ensure!(!self.interpreters.is_empty(), "No interpreter configured");
        let mut failures = vec![];
        for interpreter in &self.interpreters {
            match interpreter.sanity_run(artifact, size) {
                Ok(report) => return Ok(report),
                Err(e) => {
                    warn!("{} could not run {:?}: {:#}", interpreter.name(), artifact, e);
                    failures.push((interpreter.name().to_string(), format!("{e:#}")));
                }
            }
        }
        Err(StageError::Sanity { artifact: artifact.to_path_buf(), failures }.into())
    }
}
