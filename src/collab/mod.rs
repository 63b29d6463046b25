//! Collaborators the signing pipeline orchestrates but does not implement:
//! template rendering, format conversion and QR image generation.
//!
//! Each is a trait so deployments and tests can swap implementations. The
//! built-in ones are a placeholder-substituting renderer and two adapters
//! around external programs.

pub mod convert;
pub mod qr;
pub mod render;

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::ImageSize;
use crate::error::{RenderError, Result};

pub use convert::CommandConverter;
pub use qr::CommandQrGenerator;
pub use render::PlaceholderRenderer;

/// A value substituted into a template placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderValue {
    Text(String),
    Image(ImageRef),
}

/// Reference to an image file placed into the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: PathBuf,
    pub size: ImageSize,
}

/// Placeholder name to value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderContext {
    values: BTreeMap<String, RenderValue>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a document's own text fields.
    pub fn from_text_fields(fields: &BTreeMap<String, String>) -> Self {
        Self {
            values: fields
                .iter()
                .map(|(k, v)| (k.clone(), RenderValue::Text(v.clone())))
                .collect(),
        }
    }

    /// Insert or overwrite a text value.
    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), RenderValue::Text(value.into()));
        self
    }

    /// Insert or overwrite an image value.
    pub fn image(mut self, key: impl Into<String>, path: impl Into<PathBuf>, size: ImageSize) -> Self {
        self.values.insert(
            key.into(),
            RenderValue::Image(ImageRef {
                path: path.into(),
                size,
            }),
        );
        self
    }

    pub fn get(&self, key: &str) -> Option<&RenderValue> {
        self.values.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RenderValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Fills a template's placeholders.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        template: &[u8],
        context: &RenderContext,
    ) -> std::result::Result<Vec<u8>, RenderError>;
}

/// Turns a rendered document into the final distributable format.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, document: Vec<u8>) -> Result<Vec<u8>>;

    /// File extension of the converted output.
    fn output_extension(&self) -> &str {
        "pdf"
    }
}

/// Encodes a URL as a QR code image (PNG).
#[async_trait]
pub trait QrGenerator: Send + Sync {
    async fn generate(&self, url: &str, size: u32) -> Result<Vec<u8>>;
}
