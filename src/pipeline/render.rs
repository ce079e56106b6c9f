//! Rasterisation: the [`PageRenderer`] protocol and its pdfium implementation.
//!
//! Renderers are blocking. The orchestrator calls them through
//! `tokio::task::spawn_blocking` so a slow rasterisation never stalls the
//! worker threads that are awaiting backend responses.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded per in-flight unit.

use crate::error::Pdf2MdError;
use crate::layout::BoundingBox;
use crate::output::DocumentMetadata;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::encode::encode_png;

/// A rasterised page or region, PNG-encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RenderedImage {
    pub fn from_image(img: &DynamicImage) -> Result<Self, RenderError> {
        let png = encode_png(img).map_err(|e| RenderError::Decode(e.to_string()))?;
        Ok(Self {
            png,
            width: img.width(),
            height: img.height(),
        })
    }
}

/// Failure to produce an image for one page or region.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Stateless image producer for one document.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self) -> usize;

    /// Render a whole page (0-based index).
    fn render(&self, page_index: usize, dpi: u32) -> Result<RenderedImage, RenderError>;

    /// Render the region `bbox` of a page.
    fn render_region(
        &self,
        page_index: usize,
        bbox: BoundingBox,
        dpi: u32,
    ) -> Result<RenderedImage, RenderError>;

    fn metadata(&self) -> DocumentMetadata {
        DocumentMetadata {
            page_count: self.page_count(),
            ..Default::default()
        }
    }
}

/// Renderer backed by the pdfium library.
///
/// pdfium documents are not `Send`, so each call re-opens the file on the
/// calling (blocking) thread.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    path: PathBuf,
    password: Option<String>,
    max_pixels: u32,
    page_count: usize,
    metadata: DocumentMetadata,
}

impl PdfiumRenderer {
    /// Open the document once to validate it and read metadata.
    pub fn open(path: &Path, password: Option<&str>, max_pixels: u32) -> Result<Self, Pdf2MdError> {
        let pdfium = Pdfium::default();
        let document = load_document(&pdfium, path, password)?;
        let metadata = read_metadata(&document);
        info!("PDF loaded: {} pages", metadata.page_count);

        Ok(Self {
            path: path.to_path_buf(),
            password: password.map(str::to_string),
            max_pixels,
            page_count: metadata.page_count,
            metadata,
        })
    }

    fn rasterise(&self, page_index: usize, dpi: u32) -> Result<DynamicImage, RenderError> {
        if page_index >= self.page_count {
            return Err(RenderError::InvalidInput(format!(
                "page {} out of range (document has {} pages)",
                page_index + 1,
                self.page_count
            )));
        }

        let pdfium = Pdfium::default();
        let document = pdfium
            .load_pdf_from_file(&self.path, self.password.as_deref())
            .map_err(|e| RenderError::Decode(format!("{e:?}")))?;
        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| RenderError::Decode(format!("{e:?}")))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::Decode(format!("{e:?}")))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render(&self, page_index: usize, dpi: u32) -> Result<RenderedImage, RenderError> {
        let image = self.rasterise(page_index, dpi)?;
        RenderedImage::from_image(&image)
    }

    fn render_region(
        &self,
        page_index: usize,
        bbox: BoundingBox,
        dpi: u32,
    ) -> Result<RenderedImage, RenderError> {
        let image = self.rasterise(page_index, dpi)?;
        RenderedImage::from_image(&crop(&image, bbox))
    }

    fn metadata(&self) -> DocumentMetadata {
        self.metadata.clone()
    }
}

/// Crop a normalised region out of a rendered page.
pub fn crop(image: &DynamicImage, bbox: BoundingBox) -> DynamicImage {
    let (x, y, w, h) = bbox.to_pixels(image.width(), image.height());
    image.crop_imm(x, y, w, h)
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, Pdf2MdError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let err_str = format!("{e:?}");
        if err_str.to_lowercase().contains("password") {
            if password.is_some() {
                Pdf2MdError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                Pdf2MdError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            Pdf2MdError::CorruptPdf {
                path: path.to_path_buf(),
                detail: err_str,
            }
        }
    })
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata
            .get(tag)
            .map(|t| t.value().to_string())
            .filter(|v| !v.is_empty())
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        creator: get_meta(PdfDocumentMetadataTagType::Creator),
        producer: get_meta(PdfDocumentMetadataTagType::Producer),
        creation_date: get_meta(PdfDocumentMetadataTagType::CreationDate),
        modification_date: get_meta(PdfDocumentMetadataTagType::ModificationDate),
        page_count: document.pages().len() as usize,
        pdf_version: format!("{:?}", document.version()),
    }
}
