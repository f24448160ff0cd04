use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tract_core::internal::*;

use crate::errors::StageError;
use crate::python::Python;

pub const DEFAULT_TF_DIR: &str = "unet_tf";

/// ONNX to TensorFlow SavedModel translation. The layout of `output_dir` is
/// up to the implementation.
pub trait Translator {
    fn translate(&self, input: &Path, output_dir: &Path) -> TractResult<()>;
}

/// `python -m onnx2tf -i <input> -o <output_dir>`, on the shared console.
#[derive(Clone, Debug)]
pub struct Onnx2Tf(pub Python);

impl Onnx2Tf {
    pub const MODULE: &'static str = "onnx2tf";

    pub fn args<'a>(input: &'a Path, output_dir: &'a Path) -> [&'a OsStr; 4] {
        [OsStr::new("-i"), input.as_os_str(), OsStr::new("-o"), output_dir.as_os_str()]
    }
}

impl Translator for Onnx2Tf {
    fn translate(&self, input: &Path, output_dir: &Path) -> TractResult<()> {
        let status = self.0.run_module(Self::MODULE, Self::args(input, output_dir))?;
        if !status.success() {
            return Err(StageError::Translate { status }.into());
        }
        Ok(())
    }
}

pub fn translate_graph(
    translator: &dyn Translator,
    input: &Path,
    output_dir: &Path,
) -> TractResult<PathBuf> {
    info!("Translating {input:?} into {output_dir:?}");
    translator.translate(input, output_dir)?;
    Ok(output_dir.to_path_buf())
}
