//! Building blocks shared by every driver.
//!
//! - **discovery**: Find image files in directories
//! - **decode**: Load images from disk
//! - **sidecar**: Name, read and write `<stem>.<ext>` caption files

pub mod decode;
pub mod discovery;
pub mod sidecar;

// Re-exports for convenient access
pub use decode::{load_image, load_rgb};
pub use discovery::{ImageDiscovery, IMAGE_EXTENSIONS};
pub use sidecar::{read_sidecar, sidecar_path, sidecar_path_in, write_sidecar};
