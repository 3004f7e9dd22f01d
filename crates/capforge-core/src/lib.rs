//! Capforge Core - batch image captioning building blocks.
//!
//! Capforge runs pretrained captioning and tagging models over a directory of
//! images and writes one small text file per image and producer:
//!
//! ```text
//! cat.jpg → cat.wd14cap (tags)      ┐
//!         → cat.b2cap   (BLIP)      ├→ cat.txt (synthesized caption)
//!         → cat.flamcap (few-shot)  ┘
//! ```
//!
//! Each stage runs on its own; the synthesizer finds earlier outputs purely
//! by filename.
//!
//! # Usage
//!
//! ```rust,ignore
//! use capforge_core::{Config, ImageDiscovery, ModelHub, Wd14Tagger};
//!
//! #[tokio::main]
//! async fn main() -> capforge_core::Result<()> {
//!     let config = Config::load()?;
//!     let hub = ModelHub::new(config.model_dir());
//!     let tagger = Wd14Tagger::load(&config.tagger, &hub).await?;
//!
//!     let images = ImageDiscovery::recursive().discover("./photos".as_ref());
//!     let stats = tagger.run(&images, |_| {})?;
//!     println!("Tagged {} images", stats.written);
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod caption;
pub mod config;
pub mod error;
pub mod hub;
pub mod pipeline;
pub mod retry;
pub mod summarize;
pub mod tagger;
pub mod types;

// Re-exports for convenient access
pub use caption::fewshot::FewShotCaptioner;
pub use config::Config;
pub use error::{CapforgeError, ConfigError, PipelineError, PipelineResult, Result};
pub use hub::ModelHub;
pub use pipeline::ImageDiscovery;
pub use summarize::{SummaryBackend, Synthesizer};
pub use tagger::Wd14Tagger;
pub use types::{CaptionArtifact, RunStats, Tag};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
