use std::path::Path;

use serde::Serialize;
use tract_core::internal::*;
use tract_onnx::pb::ModelProto;
use tract_onnx::prelude::InferenceModelExt;

use crate::sanity::describe_facts;

/// Diagnostic view of a model file: names, declared facts and, for ONNX,
/// producer and operator sets.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub format: String,
    pub producer: Option<String>,
    pub opsets: Vec<(String, i64)>,
    pub input_names: Vec<String>,
    pub output_names: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl GraphSummary {
    /// Version of the default ("" or "ai.onnx") operator set, if declared.
    pub fn default_opset(&self) -> Option<i64> {
        self.opsets
            .iter()
            .find(|(domain, _)| domain.is_empty() || domain == "ai.onnx")
            .map(|(_, v)| *v)
    }
}

impl std::fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "format: {}", self.format)?;
        if let Some(producer) = &self.producer {
            writeln!(f, "producer: {producer}")?;
        }
        for (domain, version) in &self.opsets {
            let domain = if domain.is_empty() { "ai.onnx" } else { domain };
            writeln!(f, "opset: {domain} v{version}")?;
        }
        for (name, fact) in self.input_names.iter().zip(self.inputs.iter()) {
            writeln!(f, "input  {name}: {fact}")?;
        }
        for (name, fact) in self.output_names.iter().zip(self.outputs.iter()) {
            writeln!(f, "output {name}: {fact}")?;
        }
        Ok(())
    }
}

fn proto_summary(proto: &ModelProto) -> GraphSummary {
    let producer = if proto.producer_name.is_empty() {
        None
    } else if proto.producer_version.is_empty() {
        Some(proto.producer_name.clone())
    } else {
        Some(format!("{} {}", proto.producer_name, proto.producer_version))
    };
    let opsets = proto.opset_import.iter().map(|o| (o.domain.clone(), o.version)).collect();
    let (input_names, output_names): (Vec<String>, Vec<String>) = proto
        .graph
        .as_ref()
        .map(|g| {
            (
                g.input.iter().map(|i| i.name.clone()).collect(),
                g.output.iter().map(|o| o.name.clone()).collect(),
            )
        })
        .unwrap_or_default();
    GraphSummary {
        format: "onnx".into(),
        producer,
        opsets,
        input_names,
        output_names,
        ..GraphSummary::default()
    }
}

pub fn inspect_onnx(path: &Path) -> TractResult<GraphSummary> {
    let onnx = tract_onnx::onnx();
    let proto = onnx
        .proto_model_for_path(path)
        .with_context(|| format!("Reading ONNX graph {path:?}"))?;
    let mut summary = proto_summary(&proto);
    let model = onnx.model_for_proto_model(&proto)?.into_typed()?;
    (summary.inputs, summary.outputs) = describe_facts(&model)?;
    Ok(summary)
}

pub fn inspect_tflite(path: &Path) -> TractResult<GraphSummary> {
    let model = tract_tflite::tflite()
        .model_for_path(path)
        .with_context(|| format!("Loading TFLite artifact {path:?}"))?;
    let names = |outlets: &[OutletId]| -> Vec<String> {
        outlets.iter().map(|o| model.node(o.node).name.clone()).collect()
    };
    let (inputs, outputs) = describe_facts(&model)?;
    Ok(GraphSummary {
        format: "tflite".into(),
        input_names: names(&model.inputs),
        output_names: names(&model.outputs),
        inputs,
        outputs,
        ..GraphSummary::default()
    })
}

/// Dispatches on the file extension.
pub fn inspect(path: &Path) -> TractResult<GraphSummary> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("onnx") => inspect_onnx(path),
        Some("tflite") => inspect_tflite(path),
        _ => bail!("Can not guess model format of {:?} (expected .onnx or .tflite)", path),
    }
}

/// Warns about exported graphs that do not look like what was asked for.
/// Never fails: this is diagnostics only.
pub fn check_exported(
    path: &Path,
    input_name: &str,
    output_name: &str,
    opset: u32,
) -> Option<GraphSummary> {
    let summary = match inspect_onnx(path) {
        Ok(summary) => summary,
        Err(e) => {
            warn!("Could not inspect {path:?}: {e:#}");
            return None;
        }
    };
    if !summary.input_names.iter().any(|n| n == input_name) {
        warn!("{path:?}: no input named {input_name:?} (found {:?})", summary.input_names);
    }
    if !summary.output_names.iter().any(|n| n == output_name) {
        warn!("{path:?}: no output named {output_name:?} (found {:?})", summary.output_names);
    }
    match summary.default_opset() {
        Some(v) if v != opset as i64 => warn!("{path:?}: opset {v}, expected {opset}"),
        None => warn!("{path:?}: no default opset declared"),
        _ => (),
    }
    debug!("{path:?}\n{summary}");
    Some(summary)
}
