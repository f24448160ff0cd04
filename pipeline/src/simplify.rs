use std::path::{Path, PathBuf};

use tract_core::internal::*;

use crate::errors::StageError;
use crate::python::{Python, ScriptOutput};

pub const DEFAULT_SIMPLIFIED_ONNX: &str = "unet_pet_simp.onnx";

/// Graph simplification pass. Returns the simplifier's own success flag;
/// the output file is only meaningful when it is true.
pub trait Simplifier {
    fn simplify(&self, input: &Path, output: &Path) -> TractResult<bool>;
}

const ONNXSIM: &str = r#"
import sys
import onnx
from onnxsim import simplify
model = onnx.load(sys.argv[1])
simplified, ok = simplify(model)
print("SIMPLIFY_OK:", bool(ok))
if ok:
    onnx.save(simplified, sys.argv[2])
"#;

/// `onnxsim.simplify` through the shared interpreter.
#[derive(Clone, Debug)]
pub struct OnnxSim(pub Python);

impl Simplifier for OnnxSim {
    fn simplify(&self, input: &Path, output: &Path) -> TractResult<bool> {
        let out = self.0.run_script("onnxsim", ONNXSIM, [input, output])?;
        success_flag(&out)
    }
}

fn success_flag(out: &ScriptOutput) -> TractResult<bool> {
    match out.value("SIMPLIFY_OK") {
        Some("True") => Ok(true),
        Some("False") => Ok(false),
        other => bail!("onnxsim did not report a success flag (got {:?})", other),
    }
}

/// Runs the simplifier and turns a false flag into a hard failure: an
/// unsimplified graph is not fed to the translator.
pub fn simplify_graph(
    simplifier: &dyn Simplifier,
    input: &Path,
    output: &Path,
) -> TractResult<PathBuf> {
    info!("Simplifying {input:?} into {output:?}");
    if !simplifier.simplify(input, output)? {
        return Err(StageError::Simplify { input: input.to_path_buf() }.into());
    }
    Ok(output.to_path_buf())
}
