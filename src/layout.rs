//! Layout blocks and the segmenter protocol used in block-level mode.
//!
//! Block mode splits a page into regions (tables, formulas, prose) so that
//! each can be routed to the backend and prompt best suited to it. The
//! actual layout analysis is an external concern; this module defines the
//! geometry and type vocabulary plus [`WholePageSegmenter`], which yields one
//! `text` block per page when no analyzer is plugged in.

use crate::error::Pdf2MdError;
use crate::pipeline::render::PageRenderer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Semantic type of a layout block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlockType {
    Text,
    Title,
    Table,
    Formula,
    Figure,
    List,
    Caption,
    Header,
    Footer,
    Other(String),
}

impl BlockType {
    pub fn as_str(&self) -> &str {
        match self {
            BlockType::Text => "text",
            BlockType::Title => "title",
            BlockType::Table => "table",
            BlockType::Formula => "formula",
            BlockType::Figure => "figure",
            BlockType::List => "list",
            BlockType::Caption => "caption",
            BlockType::Header => "header",
            BlockType::Footer => "footer",
            BlockType::Other(s) => s,
        }
    }
}

impl From<&str> for BlockType {
    fn from(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "text" | "paragraph" => BlockType::Text,
            "title" | "heading" => BlockType::Title,
            "table" => BlockType::Table,
            "formula" | "equation" => BlockType::Formula,
            "figure" | "image" => BlockType::Figure,
            "list" => BlockType::List,
            "caption" => BlockType::Caption,
            "header" => BlockType::Header,
            "footer" => BlockType::Footer,
            other => BlockType::Other(other.to_string()),
        }
    }
}

impl From<String> for BlockType {
    fn from(s: String) -> Self {
        BlockType::from(s.as_str())
    }
}

impl From<BlockType> for String {
    fn from(t: BlockType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Region of a page in normalised coordinates.
///
/// All four values lie in `0.0..=1.0`, measured from the top-left corner, so
/// a box stays valid regardless of the DPI the page is rendered at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub const FULL_PAGE: BoundingBox = BoundingBox {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    /// Clamp the box into the unit square.
    pub fn clamped(&self) -> BoundingBox {
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        BoundingBox {
            x,
            y,
            width: self.width.clamp(0.0, 1.0 - x),
            height: self.height.clamp(0.0, 1.0 - y),
        }
    }

    /// Pixel rectangle `(x, y, w, h)` for an image of the given size.
    ///
    /// Always at least 1×1 so a degenerate box still crops something.
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
        let (img_width, img_height) = (img_width.max(1), img_height.max(1));
        let b = self.clamped();
        let px = ((b.x * img_width as f32).floor() as u32).min(img_width.saturating_sub(1));
        let py = ((b.y * img_height as f32).floor() as u32).min(img_height.saturating_sub(1));
        let pw = ((b.width * img_width as f32).ceil() as u32).clamp(1, img_width - px);
        let ph = ((b.height * img_height as f32).ceil() as u32).clamp(1, img_height - py);
        (px, py, pw, ph)
    }
}

/// A segmented region of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub block_type: BlockType,
    /// 0-based page index.
    pub page_index: usize,
    pub bbox: BoundingBox,
}

/// External document-layout analyzer.
///
/// Returns blocks in reading order: the order of the returned vector becomes
/// the assembly order of the converted document.
#[async_trait]
pub trait LayoutSegmenter: Send + Sync {
    async fn segment(
        &self,
        renderer: Arc<dyn PageRenderer>,
        page_indices: &[usize],
    ) -> Result<Vec<Block>, Pdf2MdError>;
}

/// Segmenter that treats every page as a single `text` block.
#[derive(Debug, Default, Clone, Copy)]
pub struct WholePageSegmenter;

#[async_trait]
impl LayoutSegmenter for WholePageSegmenter {
    async fn segment(
        &self,
        _renderer: Arc<dyn PageRenderer>,
        page_indices: &[usize],
    ) -> Result<Vec<Block>, Pdf2MdError> {
        Ok(page_indices
            .iter()
            .map(|&page_index| Block {
                id: format!("p{}-b0", page_index + 1),
                block_type: BlockType::Text,
                page_index,
                bbox: BoundingBox::FULL_PAGE,
            })
            .collect())
    }
}
