pub mod config;
pub mod renderer;
pub mod window;

pub use config::{AttachmentFormats, PresentModePreference, RendererConfig};
