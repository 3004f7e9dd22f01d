//! BLIP image captioning on candle.
//!
//! Supports the full-precision safetensors weights and the q4k GGUF
//! quantization. The model expects:
//! - Input size: 384×384 pixels (resize to fill, centre crop)
//! - Normalization: CLIP mean/std per channel
//! - Tensor layout: CHW

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{blip, quantized_blip};
use image::imageops::FilterType;
use image::DynamicImage;
use tokenizers::Tokenizer;

use super::{caption_images, ImageCaptioner};
use crate::config::BlipConfig;
use crate::error::PipelineError;
use crate::hub::ModelHub;
use crate::types::RunStats;

const IMAGE_SIZE: u32 = 384;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// `[DEC]` token that starts every caption.
const BOS_TOKEN_ID: u32 = 30522;

/// `[SEP]` token that ends a caption.
const SEP_TOKEN_ID: u32 = 102;

pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Local files needed to build a [`BlipCaptioner`].
#[derive(Debug, Clone)]
pub struct BlipFiles {
    pub weights: PathBuf,
    pub tokenizer: PathBuf,
    pub quantized: bool,
}

impl BlipFiles {
    /// Download (if needed) the weights and tokenizer selected by `config`.
    pub async fn fetch(config: &BlipConfig, hub: &ModelHub) -> Result<Self, PipelineError> {
        let weights = if config.quantized {
            hub.fetch_main(&config.quantized_repo, &config.quantized_file)
                .await?
        } else {
            hub.fetch(&config.model_repo, &config.revision, WEIGHTS_FILE)
                .await?
        };
        let tokenizer = hub.fetch_main(&config.model_repo, TOKENIZER_FILE).await?;
        Ok(Self {
            weights,
            tokenizer,
            quantized: config.quantized,
        })
    }
}

enum BlipModel {
    Full(blip::BlipForConditionalGeneration),
    Quantized(quantized_blip::BlipForConditionalGeneration),
}

impl BlipModel {
    fn embed_image(&self, image: &Tensor) -> candle_core::Result<Tensor> {
        let batch = image.unsqueeze(0)?;
        match self {
            Self::Full(m) => m.vision_model().forward(&batch),
            Self::Quantized(m) => m.vision_model().forward(&batch),
        }
    }

    fn decode_step(
        &mut self,
        input_ids: &Tensor,
        image_embeds: &Tensor,
    ) -> candle_core::Result<Tensor> {
        match self {
            Self::Full(m) => m.text_decoder().forward(input_ids, image_embeds),
            Self::Quantized(m) => m.text_decoder().forward(input_ids, image_embeds),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Full(m) => m.reset_kv_cache(),
            Self::Quantized(m) => m.reset_kv_cache(),
        }
    }
}

/// A loaded BLIP model with its tokenizer and sampler.
pub struct BlipCaptioner {
    model: BlipModel,
    tokenizer: Tokenizer,
    sampler: LogitsProcessor,
    device: Device,
    max_length: usize,
    min_length: usize,
}

impl BlipCaptioner {
    /// Load weights and tokenizer onto the configured device.
    pub fn load(files: &BlipFiles, config: &BlipConfig) -> Result<Self, PipelineError> {
        let model_err = |e: String| PipelineError::Model {
            message: format!("BLIP: {e}"),
        };

        let device = select_device(config.cpu);
        tracing::info!("Loading BLIP from {:?} on {:?}", files.weights, device);

        let blip_config = blip::Config::image_captioning_large();
        let model = if files.quantized {
            let vb = quantized_blip::VarBuilder::from_gguf(&files.weights, &device)
                .map_err(|e| model_err(e.to_string()))?;
            BlipModel::Quantized(
                quantized_blip::BlipForConditionalGeneration::new(&blip_config, vb)
                    .map_err(|e| model_err(e.to_string()))?,
            )
        } else {
            // SAFETY: the weights file is not modified while mapped
            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)
                    .map_err(|e| model_err(e.to_string()))?
            };
            BlipModel::Full(
                blip::BlipForConditionalGeneration::new(&blip_config, vb)
                    .map_err(|e| model_err(e.to_string()))?,
            )
        };

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| model_err(format!("tokenizer: {e}")))?;

        let seed = config.seed.unwrap_or_else(rand::random);
        let sampler = if config.use_nucleus_sampling {
            LogitsProcessor::new(seed, Some(config.temperature), Some(config.top_p))
        } else {
            LogitsProcessor::new(seed, None, None)
        };

        tracing::info!("BLIP model loaded successfully");
        Ok(Self {
            model,
            tokenizer,
            sampler,
            device,
            max_length: config.max_length,
            min_length: config.min_length,
        })
    }

    fn generate(&mut self, image: &DynamicImage) -> candle_core::Result<Vec<u32>> {
        let pixels = preprocess(image, &self.device)?;

        self.model.reset();
        let image_embeds = self.model.embed_image(&pixels)?;

        let mut tokens = vec![BOS_TOKEN_ID];
        for index in 0..self.max_length {
            let context = if index > 0 { 1 } else { tokens.len() };
            let start = tokens.len().saturating_sub(context);
            let input_ids = Tensor::new(&tokens[start..], &self.device)?.unsqueeze(0)?;

            let logits = self.model.decode_step(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let logits = if index < self.min_length {
                suppress_token(&logits, SEP_TOKEN_ID)?
            } else {
                logits
            };

            let token = self.sampler.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            tokens.push(token);
        }
        self.model.reset();

        Ok(tokens.split_off(1))
    }
}

impl ImageCaptioner for BlipCaptioner {
    fn caption(&mut self, image: &DynamicImage, path: &Path) -> Result<String, PipelineError> {
        let fail = |message: String| PipelineError::Caption {
            path: path.to_path_buf(),
            message,
        };
        let tokens = self.generate(image).map_err(|e| fail(e.to_string()))?;
        self.tokenizer
            .decode(&tokens, true)
            .map_err(|e| fail(format!("decode: {e}")))
    }
}

/// Caption `images` with BLIP, writing `<stem>.<ext>` sidecars.
///
/// The model lives only inside the blocking task, so weights and device
/// memory are released when the run finishes, whether it succeeds or not.
pub async fn run(
    config: &BlipConfig,
    hub: &ModelHub,
    images: Vec<PathBuf>,
) -> Result<RunStats, PipelineError> {
    let files = BlipFiles::fetch(config, hub).await?;
    let config = config.clone();

    tokio::task::spawn_blocking(move || {
        let mut captioner = BlipCaptioner::load(&files, &config)?;
        caption_images(&mut captioner, &images, &config.output_extension)
    })
    .await
    .map_err(|e| PipelineError::Model {
        message: format!("BLIP task failed: {e}"),
    })?
}

fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

/// Resize to fill 384×384 and normalize into a `[3, 384, 384]` tensor.
fn preprocess(image: &DynamicImage, device: &Device) -> candle_core::Result<Tensor> {
    let rgb = image
        .resize_to_fill(IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle)
        .to_rgb8();
    let size = IMAGE_SIZE as usize;
    let data = Tensor::from_vec(rgb.into_raw(), (size, size, 3), device)?.permute((2, 0, 1))?;
    let mean = Tensor::new(&CLIP_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&CLIP_STD, device)?.reshape((3, 1, 1))?;
    (data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)
}

/// Make `token` unselectable.
fn suppress_token(logits: &Tensor, token: u32) -> candle_core::Result<Tensor> {
    let mut values = logits.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    if let Some(v) = values.get_mut(token as usize) {
        *v = f32::NEG_INFINITY;
    }
    Tensor::new(values.as_slice(), logits.device())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([255, 255, 255])));
        let tensor = preprocess(&img, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3, 384, 384]);

        let first: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let expected = (1.0 - CLIP_MEAN[0]) / CLIP_STD[0];
        assert!((first[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_suppress_token_blocks_argmax() {
        let logits = Tensor::new(&[0.1f32, 0.2, 5.0, 0.3], &Device::Cpu).unwrap();
        let suppressed = suppress_token(&logits, 2).unwrap();
        let mut sampler = LogitsProcessor::new(0, None, None);
        assert_eq!(sampler.sample(&logits).unwrap(), 2);
        assert_eq!(sampler.sample(&suppressed).unwrap(), 3);
    }

    #[test]
    fn test_suppress_out_of_range_is_noop() {
        let logits = Tensor::new(&[1.0f32, 2.0], &Device::Cpu).unwrap();
        let same = suppress_token(&logits, 99).unwrap();
        assert_eq!(same.to_vec1::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_forced_cpu_device() {
        assert!(matches!(select_device(true), Device::Cpu));
    }
}
