#[macro_use]
extern crate log;

pub mod errors;
pub mod export;
pub mod inspect;
pub mod mask;
pub mod package;
pub mod pipeline;
pub mod python;
pub mod sanity;
pub mod simplify;
pub mod translate;

pub use errors::StageError;
pub use pipeline::{Pipeline, PipelineConfig, RunSummary, Stage, Toolchain};
pub use python::Python;

pub mod prelude {
    pub use crate::errors::StageError;
    pub use crate::export::{ExportRequest, ExportStrategy, GraphExporter};
    pub use crate::package::{FlatbufferConverter, PackageMode, Packaged};
    pub use crate::pipeline::{Pipeline, PipelineConfig, RunSummary, Stage, Toolchain};
    pub use crate::python::Python;
    pub use crate::sanity::{Interpreter, SanityChecker, SanityReport};
    pub use crate::simplify::Simplifier;
    pub use crate::translate::Translator;
    pub use tract_core::prelude::TractResult;
}
