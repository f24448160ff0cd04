use std::path::{Path, PathBuf};

use serde::Serialize;
use tract_core::internal::*;

use crate::errors::StageError;
use crate::python::Python;

pub const DEFAULT_TFLITE: &str = "unet_pet_fp32.tflite";
pub const SAVED_MODEL_DESCRIPTOR: &str = "saved_model.pb";
pub const SAVED_MODEL_SUBDIR: &str = "saved_model";

/// SavedModel to flat binary conversion.
pub trait FlatbufferConverter {
    fn convert(&self, saved_model_dir: &Path, destination: &Path) -> TractResult<()>;
}

const TFLITE_CONVERTER: &str = r#"
import sys
import tensorflow as tf
converter = tf.lite.TFLiteConverter.from_saved_model(sys.argv[1])
flat = converter.convert()
with open(sys.argv[2], "wb") as f:
    f.write(flat)
print("TFLITE_BYTES:", len(flat))
"#;

/// `tf.lite.TFLiteConverter.from_saved_model`, without any optimization:
/// the result stays fp32.
#[derive(Clone, Debug)]
pub struct TfLiteConverter(pub Python);

impl FlatbufferConverter for TfLiteConverter {
    fn convert(&self, saved_model_dir: &Path, destination: &Path) -> TractResult<()> {
        let out = self.0.run_script("tflite", TFLITE_CONVERTER, [saved_model_dir, destination])?;
        if let Some(bytes) = out.value("TFLITE_BYTES") {
            debug!("TFLite converter wrote {bytes} bytes");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageMode {
    /// The translator already wrote a flat binary, it was copied.
    Prebuilt,
    /// The converter was driven on the located SavedModel.
    Converted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Packaged {
    pub path: PathBuf,
    pub mode: PackageMode,
    pub bytes: u64,
}

impl Packaged {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1e6
    }
}

/// Name of the fp32 flat binary onnx2tf leaves next to the SavedModel,
/// derived from the translated graph's file stem.
pub fn prebuilt_name(translated_graph: &Path) -> String {
    let stem = translated_graph.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    format!("{stem}_float32.tflite")
}

/// Sorted entry names of `dir`, for diagnostics.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs_err::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            debug!("{e}");
            vec![]
        }
    };
    names.sort();
    names
}

/// First candidate directory holding a SavedModel descriptor:
/// `<dir>/saved_model`, then `<dir>` itself.
pub fn locate_saved_model(dir: &Path) -> TractResult<PathBuf> {
    let candidates = [dir.join(SAVED_MODEL_SUBDIR), dir.to_path_buf()];
    for candidate in candidates {
        if candidate.join(SAVED_MODEL_DESCRIPTOR).is_file() {
            debug!("SavedModel found in {candidate:?}");
            return Ok(candidate);
        }
    }
    Err(StageError::Locate { dir: dir.to_path_buf(), listing: listing(dir) }.into())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Produces the final flat binary at `destination` from the translator's
/// output directory.
pub fn package(
    converter: &dyn FlatbufferConverter,
    tf_dir: &Path,
    prebuilt: &str,
    destination: &Path,
) -> TractResult<Packaged> {
    let prebuilt = tf_dir.join(prebuilt);
    let mode = if prebuilt.is_file() {
        if same_file(&prebuilt, destination) {
            info!("Prebuilt {prebuilt:?} is already the destination");
        } else {
            info!("Copying prebuilt {prebuilt:?} to {destination:?}");
            fs_err::copy(&prebuilt, destination)?;
        }
        PackageMode::Prebuilt
    } else {
        let saved_model = locate_saved_model(tf_dir)?;
        info!("Converting {saved_model:?} to {destination:?}");
        converter.convert(&saved_model, destination)?;
        PackageMode::Converted
    };
    let bytes = fs_err::metadata(destination)?.len();
    Ok(Packaged { path: destination.to_path_buf(), mode, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Recording {
        calls: Cell<usize>,
        source: std::cell::RefCell<Option<PathBuf>>,
    }

    impl FlatbufferConverter for Recording {
        fn convert(&self, saved_model_dir: &Path, destination: &Path) -> TractResult<()> {
            self.calls.set(self.calls.get() + 1);
            *self.source.borrow_mut() = Some(saved_model_dir.to_path_buf());
            fs_err::write(destination, b"TFL3 converted")?;
            Ok(())
        }
    }

    #[test]
    fn prebuilt_name_follows_graph_stem() {
        assert_eq!(prebuilt_name(Path::new("out/unet_pet_simp.onnx")), "unet_pet_simp_float32.tflite");
    }

    #[test]
    fn fast_path_copies_verbatim() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let tf_dir = dir.path().join("unet_tf");
        fs_err::create_dir_all(tf_dir.join("saved_model"))?;
        fs_err::write(tf_dir.join("saved_model/saved_model.pb"), b"pb")?;
        let content: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        fs_err::write(tf_dir.join("m_float32.tflite"), &content)?;
        let converter = Recording::default();
        let dest = dir.path().join("final.tflite");
        let packaged = package(&converter, &tf_dir, "m_float32.tflite", &dest)?;
        assert_eq!(packaged.mode, PackageMode::Prebuilt);
        assert_eq!(packaged.bytes, 4096);
        assert_eq!(fs_err::read(&dest)?, content);
        assert_eq!(converter.calls.get(), 0);
        Ok(())
    }

    #[test]
    fn fast_path_onto_itself_is_noop() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let prebuilt = dir.path().join("m_float32.tflite");
        fs_err::write(&prebuilt, b"TFL3")?;
        let packaged = package(&Recording::default(), dir.path(), "m_float32.tflite", &prebuilt)?;
        assert_eq!(packaged.mode, PackageMode::Prebuilt);
        assert_eq!(fs_err::read(&prebuilt)?, b"TFL3");
        Ok(())
    }

    #[test]
    fn fallback_prefers_saved_model_subdir() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        fs_err::create_dir_all(dir.path().join("saved_model"))?;
        fs_err::write(dir.path().join("saved_model/saved_model.pb"), b"pb")?;
        fs_err::write(dir.path().join("saved_model.pb"), b"pb")?;
        let converter = Recording::default();
        let dest = dir.path().join("out.tflite");
        let packaged = package(&converter, dir.path(), "absent.tflite", &dest)?;
        assert_eq!(packaged.mode, PackageMode::Converted);
        assert_eq!(converter.calls.get(), 1);
        assert_eq!(converter.source.borrow().as_deref(), Some(&*dir.path().join("saved_model")));
        Ok(())
    }

    #[test]
    fn fallback_uses_dir_itself() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        fs_err::write(dir.path().join("saved_model.pb"), b"pb")?;
        assert_eq!(locate_saved_model(dir.path())?, dir.path().to_path_buf());
        Ok(())
    }

    #[test]
    fn missing_descriptor_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs_err::create_dir_all(dir.path().join("variables")).unwrap();
        fs_err::write(dir.path().join("model.h5"), b"").unwrap();
        let converter = Recording::default();
        let err = package(&converter, dir.path(), "absent.tflite", &dir.path().join("o.tflite"))
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("model.h5"));
        assert!(text.contains("variables"));
        assert_eq!(converter.calls.get(), 0);
    }
}
