//! Segmentation masks from a converted artifact, matching what the mobile
//! consumer of the `.tflite` does with its single logit channel.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgba, RgbImage, RgbaImage};
use tract_core::internal::*;

pub const DEFAULT_THRESHOLD: f32 = 0.5;
/// Alpha of the painted mask.
pub const MASK_ALPHA: u8 = 160;

/// Sigmoid that neither overflows on large negative logits nor returns
/// values outside `[0, 1]`.
pub fn sigmoid_stable(z: f32) -> f32 {
    let p = if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    };
    p.clamp(0.0, 1.0)
}

/// Resizes to `size × size` and lays out as `(1, size, size, 3)` f32 with
/// channels scaled to `[0, 1]`.
pub fn encode_nhwc(image: &RgbImage, size: usize) -> Tensor {
    let resized = imageops::resize(image, size as u32, size as u32, FilterType::Triangle);
    tract_ndarray::Array4::from_shape_fn((1, size, size, 3), |(_, y, x, c)| {
        resized[(x as u32, y as u32)][c] as f32 / 255.0
    })
    .into()
}

/// Row-major logits to a `size × size` mask: red where the foreground
/// probability reaches `threshold`, black elsewhere, both at [`MASK_ALPHA`].
pub fn mask_from_logits(logits: &[f32], size: usize, threshold: f32) -> TractResult<RgbaImage> {
    ensure!(
        logits.len() == size * size,
        "Expected {} logits for a {}x{} mask, got {}",
        size * size,
        size,
        size,
        logits.len()
    );
    Ok(RgbaImage::from_fn(size as u32, size as u32, |x, y| {
        let p = sigmoid_stable(logits[y as usize * size + x as usize]);
        let v = if p >= threshold { 255 } else { 0 };
        Rgba([v, 0, 0, MASK_ALPHA])
    }))
}

/// Scales the mask to the image and draws it on top.
pub fn overlay_on(image: &RgbImage, mask: &RgbaImage) -> RgbaImage {
    let (w, h) = (image.width().max(1), image.height().max(1));
    let scaled = imageops::resize(mask, w, h, FilterType::Triangle);
    let mut out = RgbaImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image[(x, y)].0;
        Rgba([r, g, b, 255])
    });
    imageops::overlay(&mut out, &scaled, 0, 0);
    out
}

/// A loaded segmentation model, ready to produce masks. Runs on tract, so
/// a model with operators tract-tflite does not translate (resizes,
/// transposed convolutions) fails in `for_path`.
pub struct Segmenter {
    runnable: TypedRunnableModel<TypedModel>,
    size: usize,
}

impl Segmenter {
    pub fn for_path(model: &Path, size: usize) -> TractResult<Segmenter> {
        let runnable = tract_tflite::tflite()
            .model_for_path(model)
            .with_context(|| format!("Loading TFLite artifact {model:?}"))?
            .with_input_fact(0, f32::fact([1, size, size, 3]))?
            .into_optimized()?
            .into_runnable()?;
        Ok(Segmenter { runnable, size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn logits(&self, image: &RgbImage) -> TractResult<Vec<f32>> {
        let input = encode_nhwc(image, self.size);
        let outputs = self.runnable.run(tvec!(input.into()))?;
        let output = outputs.first().context("Model produced no output")?;
        Ok(output.cast_to::<f32>()?.as_slice::<f32>()?.to_vec())
    }

    pub fn predict_mask(&self, image: &RgbImage, threshold: f32) -> TractResult<RgbaImage> {
        mask_from_logits(&self.logits(image)?, self.size, threshold)
    }
}
