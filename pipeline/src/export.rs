use std::path::PathBuf;

use tract_core::internal::*;

use crate::errors::StageError;
use crate::python::Python;

pub const DEFAULT_RAW_ONNX: &str = "unet_pet.onnx";
pub const DEFAULT_INPUT_NAME: &str = "input";
pub const DEFAULT_OUTPUT_NAME: &str = "logit";
pub const DEFAULT_OPSET: u32 = 13;

/// Everything an export strategy needs: the checkpoint, the square spatial
/// size of the `(1, 3, size, size)` zero dummy and where to write the graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    pub checkpoint: PathBuf,
    pub size: usize,
    pub output: PathBuf,
    pub input_name: String,
    pub output_name: String,
    pub opset: u32,
}

impl ExportRequest {
    pub fn new(checkpoint: impl Into<PathBuf>, size: usize) -> ExportRequest {
        ExportRequest {
            checkpoint: checkpoint.into(),
            size,
            output: DEFAULT_RAW_ONNX.into(),
            input_name: DEFAULT_INPUT_NAME.into(),
            output_name: DEFAULT_OUTPUT_NAME.into(),
            opset: DEFAULT_OPSET,
        }
    }

    pub fn with_output(self, output: impl Into<PathBuf>) -> ExportRequest {
        ExportRequest { output: output.into(), ..self }
    }

    pub fn dummy_shape(&self) -> [usize; 4] {
        [1, 3, self.size, self.size]
    }

    fn validate(&self) -> TractResult<()> {
        ensure!(self.size > 0, "Input size must be strictly positive");
        ensure!(self.checkpoint.is_file(), "TorchScript checkpoint not found: {:?}", self.checkpoint);
        Ok(())
    }
}

/// One way of turning a TorchScript checkpoint into an ONNX file.
pub trait ExportStrategy {
    fn name(&self) -> &str;
    fn export(&self, request: &ExportRequest) -> TractResult<()>;
}

const TORCHSCRIPT_EXPORT: &str = r#"
import sys
import torch
pt, size, out, input_name, output_name, opset = sys.argv[1:7]
size = int(size)
ts = torch.jit.load(pt, map_location="cpu").eval()
dummy = torch.zeros(1, 3, size, size)
torch.onnx.export(
    ts, dummy, out,
    input_names=[input_name], output_names=[output_name],
    opset_version=int(opset), do_constant_folding=True, dynamic_axes=None,
)
print("EXPORTED:", out)
"#;

const DYNAMO_EXPORT: &str = r#"
import sys
import torch
from torch.onnx import dynamo_export
pt, size, out = sys.argv[1:4]
size = int(size)
ts = torch.jit.load(pt, map_location="cpu").eval()
dummy = torch.zeros(1, 3, size, size)
dynamo_export(ts, dummy).save(out)
print("EXPORTED:", out)
"#;

fn script_args(request: &ExportRequest) -> Vec<String> {
    vec![
        request.checkpoint.display().to_string(),
        request.size.to_string(),
        request.output.display().to_string(),
        request.input_name.clone(),
        request.output_name.clone(),
        request.opset.to_string(),
    ]
}

/// Classic tracing exporter: named input and output, fixed opset, constant
/// folding, static axes.
#[derive(Clone, Debug)]
pub struct TorchScriptExport(pub Python);

impl ExportStrategy for TorchScriptExport {
    fn name(&self) -> &str {
        "torchscript"
    }

    fn export(&self, request: &ExportRequest) -> TractResult<()> {
        self.0.run_script(self.name(), TORCHSCRIPT_EXPORT, script_args(request))?;
        Ok(())
    }
}

/// Newer dynamo-based exporter. Ignores naming and opset settings.
#[derive(Clone, Debug)]
pub struct DynamoExport(pub Python);

impl ExportStrategy for DynamoExport {
    fn name(&self) -> &str {
        "dynamo"
    }

    fn export(&self, request: &ExportRequest) -> TractResult<()> {
        self.0.run_script(self.name(), DYNAMO_EXPORT, &script_args(request)[..3])?;
        Ok(())
    }
}

/// Ordered list of export strategies. The first one to succeed wins.
pub struct GraphExporter {
    strategies: Vec<Box<dyn ExportStrategy>>,
}

impl GraphExporter {
    pub fn new(strategies: Vec<Box<dyn ExportStrategy>>) -> GraphExporter {
        GraphExporter { strategies }
    }

    /// torchscript, then dynamo.
    pub fn python(python: &Python) -> GraphExporter {
        GraphExporter::new(vec![
            Box::new(TorchScriptExport(python.clone())),
            Box::new(DynamoExport(python.clone())),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    pub fn export(&self, request: &ExportRequest) -> TractResult<PathBuf> {
        request.validate()?;
        ensure!(!self.strategies.is_empty(), "No ONNX export strategy configured");
        let mut failures = vec![];
        for strategy in &self.strategies {
            info!("Exporting {:?} with {} strategy", request.checkpoint, strategy.name());
            match strategy.export(request) {
                Ok(()) => return Ok(request.output.clone()),
                Err(e) => {
                    warn!("{} export failed: {:#}", strategy.name(), e);
                    failures.push((strategy.name().to_string(), format!("{e:#}")));
                }
            }
        }
        Err(StageError::Export { failures }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Scripted {
        name: &'static str,
        failure: Option<&'static str>,
        calls: Rc<Cell<usize>>,
    }

    impl ExportStrategy for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn export(&self, request: &ExportRequest) -> TractResult<()> {
            self.calls.set(self.calls.get() + 1);
            if let Some(msg) = self.failure {
                bail!("{msg}")
            }
            fs_err::write(&request.output, b"onnx")?;
            Ok(())
        }
    }

    fn scripted(name: &'static str, failure: Option<&'static str>) -> (Box<dyn ExportStrategy>, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        (Box::new(Scripted { name, failure, calls: calls.clone() }), calls)
    }

    fn request(dir: &tempfile::TempDir) -> ExportRequest {
        let pt = dir.path().join("model.pt");
        fs_err::write(&pt, b"torchscript").unwrap();
        ExportRequest::new(pt, 64).with_output(dir.path().join("raw.onnx"))
    }

    #[test]
    fn primary_success_skips_secondary() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let (primary, primary_calls) = scripted("torchscript", None);
        let (secondary, secondary_calls) = scripted("dynamo", None);
        let exporter = GraphExporter::new(vec![primary, secondary]);
        let out = exporter.export(&request(&dir))?;
        assert!(out.exists());
        assert_eq!(primary_calls.get(), 1);
        assert_eq!(secondary_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn falls_back_to_secondary() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let (primary, primary_calls) = scripted("torchscript", Some("aten::foo not supported"));
        let (secondary, secondary_calls) = scripted("dynamo", None);
        let exporter = GraphExporter::new(vec![primary, secondary]);
        exporter.export(&request(&dir))?;
        assert_eq!(primary_calls.get(), 1);
        assert_eq!(secondary_calls.get(), 1);
        Ok(())
    }

    #[test]
    fn both_failures_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, _) = scripted("torchscript", Some("aten::foo not supported"));
        let (secondary, _) = scripted("dynamo", Some("onnxscript is not installed"));
        let exporter = GraphExporter::new(vec![primary, secondary]);
        let err = exporter.export(&request(&dir)).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("aten::foo not supported"));
        assert!(text.contains("onnxscript is not installed"));
        match err.downcast_ref::<StageError>() {
            Some(StageError::Export { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_checkpoint_before_trying() {
        let (primary, calls) = scripted("torchscript", None);
        let exporter = GraphExporter::new(vec![primary]);
        let err = exporter.export(&ExportRequest::new("/no/such/model.pt", 256)).unwrap_err();
        assert!(err.to_string().contains("checkpoint not found"));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn rejects_zero_size() {
        let dir = tempfile::tempdir().unwrap();
        let (primary, calls) = scripted("torchscript", None);
        let exporter = GraphExporter::new(vec![primary]);
        let request = ExportRequest { size: 0, ..request(&dir) };
        assert!(exporter.export(&request).is_err());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn default_request_matches_tracing_config() {
        let request = ExportRequest::new("model.pt", 256);
        assert_eq!(request.output, PathBuf::from("unet_pet.onnx"));
        assert_eq!(request.input_name, "input");
        assert_eq!(request.output_name, "logit");
        assert_eq!(request.opset, 13);
        assert_eq!(request.dummy_shape(), [1, 3, 256, 256]);
    }

    #[test]
    fn python_exporter_order() {
        let exporter = GraphExporter::python(&Python::default());
        assert_eq!(exporter.strategy_names(), vec!["torchscript", "dynamo"]);
    }
}
