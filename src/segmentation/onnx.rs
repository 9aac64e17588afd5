use super::catalog::{ModelSpec, OutputSelect};
use super::preprocess::Preprocessor;
use super::types::{Matte, SegmentationModel};
use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use ndarray::{Axis, Ix2};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use std::path::Path;

/// Single-shot segmentation network exported to ONNX
///
/// Covers the U2-Net family, ISNet, RMBG and BiRefNet exports; the
/// differences between them live in the [`ModelSpec`].
pub struct OnnxSegmenter {
    session: Session,
    spec: &'static ModelSpec,
    preprocessor: Preprocessor,
    input_name: String,
    output_name: String,
}

impl OnnxSegmenter {
    /// Create a segmenter from an ONNX file
    ///
    /// # Arguments
    /// * `model_path` - Path to the ONNX model file
    /// * `spec` - Tensor conventions of the exported network
    /// * `intra_threads` - ONNX Runtime intra-op thread count
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        spec: &'static ModelSpec,
        intra_threads: usize,
    ) -> Result<Self> {
        let path = model_path.as_ref();

        tracing::info!(model = spec.name, "Loading model from {}", path.display());

        let builder = Session::builder()
            .map_err(|e| anyhow!("Failed to create session builder: {e}"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| anyhow!("Failed to set optimization level: {e}"))?
            .with_intra_threads(intra_threads)
            .map_err(|e| anyhow!("Failed to set intra-op threads: {e}"))?;

        #[cfg(feature = "cuda")]
        let builder = builder
            .with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default().build()
            ])
            .map_err(|e| anyhow!("Failed to register CUDA execution provider: {e}"))?;

        let session = builder
            .commit_from_file(path)
            .map_err(|e| anyhow!("{e}"))
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("Model declares no inputs")?;
        let output_name = match spec.output {
            OutputSelect::First => session.outputs.first(),
            OutputSelect::Last => session.outputs.last(),
        }
        .map(|output| output.name.clone())
        .context("Model declares no outputs")?;

        tracing::info!(
            model = spec.name,
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(Self {
            session,
            spec,
            preprocessor: Preprocessor::for_spec(spec),
            input_name,
            output_name,
        })
    }
}

impl SegmentationModel for OnnxSegmenter {
    fn segment(&mut self, frame: &RgbImage) -> Result<Matte> {
        let _span = tracing::debug_span!("onnx_segment", model = self.spec.name).entered();

        let input_tensor = self.preprocessor.preprocess(frame)?;
        let input_value = Value::from_array(input_tensor)
            .map_err(|e| anyhow!("Failed to create input value: {e}"))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &input_value])
            .map_err(|e| anyhow!("Failed to run inference: {e}"))?;
        drop(_infer_span);

        let prediction = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| anyhow!("Failed to extract output array: {e}"))?;

        // Masks come back as [1, 1, H, W] or [1, H, W]; strip leading unit axes
        let mut view = prediction.view();
        while view.ndim() > 2 {
            if view.shape()[0] != 1 {
                bail!("Unexpected mask shape {:?}", prediction.shape());
            }
            view = view.index_axis_move(Axis(0), 0);
        }
        let view = view
            .into_dimensionality::<Ix2>()
            .with_context(|| format!("Unexpected mask shape {:?}", prediction.shape()))?;

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::prediction_to_matte(
            view,
            self.spec.sigmoid,
            self.spec.min_max_normalize,
            frame_width,
            frame_height,
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.spec.input_size, self.spec.input_size)
    }

    fn name(&self) -> &str {
        self.spec.name
    }
}
