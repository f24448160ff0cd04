use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

/// Terminal failures of the conversion stages.
///
/// These travel inside `TractResult` like any other error and can be
/// recovered with `downcast_ref::<StageError>()`.
#[derive(Debug)]
pub enum StageError {
    /// Every export strategy failed. Holds `(strategy, message)` in the
    /// order the strategies were tried.
    Export { failures: Vec<(String, String)> },
    /// The simplifier reported a false success flag.
    Simplify { input: PathBuf },
    /// The translator subprocess exited with a non-zero status.
    Translate { status: ExitStatus },
    /// No SavedModel descriptor under any candidate directory.
    Locate { dir: PathBuf, listing: Vec<String> },
    /// No interpreter could run the packaged artifact. Holds
    /// `(interpreter, message)` in the order they were tried.
    Sanity { artifact: PathBuf, failures: Vec<(String, String)> },
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Export { failures } => {
                write!(f, "Failed to export ONNX graph.")?;
                for (strategy, message) in failures {
                    write!(f, "\n{strategy}: {message}")?;
                }
                Ok(())
            }
            StageError::Simplify { input } => {
                write!(f, "Failed to simplify ONNX graph {input:?}")
            }
            StageError::Translate { status } => {
                write!(f, "onnx2tf failed ({status})")
            }
            StageError::Locate { dir, listing } => {
                write!(
                    f,
                    "No saved_model.pb found under {:?} or {:?}. Contents of {:?}: [{}]",
                    dir.join("saved_model"),
                    dir,
                    dir,
                    listing.join(", ")
                )
            }
            StageError::Sanity { artifact, failures } => {
                write!(f, "Could not run {artifact:?} on any interpreter.")?;
                for (interpreter, message) in failures {
                    write!(f, "\n{interpreter}: {message}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for StageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_error_lists_every_strategy() {
        let e = StageError::Export {
            failures: vec![
                ("torchscript".into(), "unsupported op aten::foo".into()),
                ("dynamo".into(), "no module named onnxscript".into()),
            ],
        };
        let text = e.to_string();
        assert!(text.contains("torchscript: unsupported op aten::foo"));
        assert!(text.contains("dynamo: no module named onnxscript"));
    }

    #[test]
    fn locate_error_shows_listing() {
        let e = StageError::Locate {
            dir: "unet_tf".into(),
            listing: vec!["variables".into(), "weird.pb".into()],
        };
        assert!(e.to_string().contains("[variables, weird.pb]"));
    }

    #[test]
    fn sanity_error_names_artifact_and_interpreters() {
        let e = StageError::Sanity {
            artifact: "unet_pet_fp32.tflite".into(),
            failures: vec![("tensorflow".into(), "no module named tensorflow".into())],
        };
        let text = e.to_string();
        assert!(text.contains("unet_pet_fp32.tflite"));
        assert!(text.contains("\ntensorflow: no module named tensorflow"));
    }
}
