//! ONNX Runtime session for a single WD14 tagger model.

use std::path::Path;
use std::sync::Mutex;

use ndarray::Array4;
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::Session;
use ort::value::Value;

use crate::error::PipelineError;

/// Wraps an ONNX Runtime session for one tagger.
///
/// Uses a `Mutex` because `Session::run` requires `&mut self`.
pub struct TaggerSession {
    session: Mutex<Session>,
    input_name: String,
}

impl TaggerSession {
    /// Load a tagger model, preferring CUDA and falling back to CPU.
    ///
    /// Fails only when neither execution path can be initialized.
    pub fn load(model_path: &Path) -> Result<Self, PipelineError> {
        let session = match Self::build_cuda(model_path) {
            Ok(session) => session,
            Err(cuda_err) => {
                tracing::debug!("CUDA session failed: {cuda_err}");
                tracing::warn!("CUDA isn't available. Trying to run on CPU.");
                Self::build_cpu(model_path).map_err(|e| PipelineError::Model {
                    message: format!("Can't run the model {}: {e}", model_path.display()),
                })?
            }
        };

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "input_1:0".to_string());

        tracing::debug!("Loaded tagger {:?} (input: {:?})", model_path, input_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
        })
    }

    fn build_cuda(model_path: &Path) -> Result<Session, String> {
        Session::builder()
            .map_err(|e| e.to_string())?
            .with_execution_providers([CUDAExecutionProvider::default()
                .build()
                .error_on_failure()])
            .map_err(|e| e.to_string())?
            .commit_from_file(model_path)
            .map_err(|e| e.to_string())
    }

    fn build_cpu(model_path: &Path) -> Result<Session, String> {
        Session::builder()
            .map_err(|e| e.to_string())?
            .commit_from_file(model_path)
            .map_err(|e| e.to_string())
    }

    /// Run the tagger on a `[1, H, W, 3]` tensor and return the score vector.
    pub fn predict(&self, tensor: &Array4<f32>, path: &Path) -> Result<Vec<f32>, PipelineError> {
        let fail = |message: String| PipelineError::Tagging {
            path: path.to_path_buf(),
            message,
        };

        let shape: Vec<i64> = tensor.shape().iter().map(|&d| d as i64).collect();
        let flat_data: Vec<f32> = tensor.iter().copied().collect();

        let input_value = Value::from_array((shape, flat_data))
            .map_err(|e| fail(format!("Failed to create input tensor: {e}")))?;
        let inputs = ort::inputs![self.input_name.as_str() => input_value];

        let mut session = self
            .session
            .lock()
            .map_err(|e| fail(format!("Session lock poisoned: {e}")))?;

        let outputs = session
            .run(inputs)
            .map_err(|e| fail(format!("ONNX inference failed: {e}")))?;

        let (_, first) = outputs
            .iter()
            .next()
            .ok_or_else(|| fail("Model produced no outputs".to_string()))?;

        let (shape, data) = first
            .try_extract_tensor::<f32>()
            .map_err(|e| fail(format!("Failed to extract scores: {e}")))?;

        // [1, num_tags] or [num_tags]
        match shape.len() {
            1 => Ok(data.to_vec()),
            2 => Ok(data[..shape[1] as usize].to_vec()),
            _ => Err(fail(format!("Unexpected output shape: {:?}", shape))),
        }
    }
}
