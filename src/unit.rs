//! Work units: the pages or blocks the orchestrator fans out.

use crate::layout::{Block, BlockType};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a unit covers.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitKind {
    /// A whole page.
    Page,
    /// A segmented region of a page.
    Block(Block),
}

/// One page or block that needs a single extraction result.
///
/// Units are immutable once created. `sequence` is unique and strictly
/// increasing within a document and fixes the assembly order.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkUnit {
    pub doc_id: Arc<str>,
    pub sequence: usize,
    /// 0-based page index.
    pub page_index: usize,
    pub dpi: u32,
    pub kind: UnitKind,
}

impl WorkUnit {
    pub fn page(doc_id: Arc<str>, sequence: usize, page_index: usize, dpi: u32) -> Self {
        Self {
            doc_id,
            sequence,
            page_index,
            dpi,
            kind: UnitKind::Page,
        }
    }

    pub fn block(doc_id: Arc<str>, sequence: usize, block: Block, dpi: u32) -> Self {
        Self {
            doc_id,
            sequence,
            page_index: block.page_index,
            dpi,
            kind: UnitKind::Block(block),
        }
    }

    /// Stable identifier used in logs and reports.
    pub fn id(&self) -> String {
        match &self.kind {
            UnitKind::Page => format!("page-{}", self.page_index + 1),
            UnitKind::Block(b) => b.id.clone(),
        }
    }

    /// Human-readable label, e.g. `page 3` or `table block p3-b1 on page 3`.
    pub fn label(&self) -> String {
        match &self.kind {
            UnitKind::Page => format!("page {}", self.page_index + 1),
            UnitKind::Block(b) => format!(
                "{} block {} on page {}",
                b.block_type,
                b.id,
                self.page_index + 1
            ),
        }
    }

    pub fn block_type(&self) -> Option<&BlockType> {
        match &self.kind {
            UnitKind::Page => None,
            UnitKind::Block(b) => Some(&b.block_type),
        }
    }

    pub fn metadata(&self) -> UnitMetadata {
        UnitMetadata {
            doc_id: self.doc_id.to_string(),
            unit_id: self.id(),
            page_num: self.page_index + 1,
            block_type: self.block_type().cloned(),
        }
    }
}

/// Context handed to a backend alongside the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub doc_id: String,
    pub unit_id: String,
    /// 1-indexed page number.
    pub page_num: usize,
    pub block_type: Option<BlockType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BoundingBox;

    #[test]
    fn page_unit_ids_are_one_indexed() {
        let unit = WorkUnit::page(Arc::from("doc"), 0, 2, 150);
        assert_eq!(unit.id(), "page-3");
        assert_eq!(unit.label(), "page 3");
        assert_eq!(unit.metadata().page_num, 3);
        assert!(unit.block_type().is_none());
    }

    #[test]
    fn block_unit_takes_page_from_block() {
        let block = Block {
            id: "p2-b4".into(),
            block_type: BlockType::Table,
            page_index: 1,
            bbox: BoundingBox::FULL_PAGE,
        };
        let unit = WorkUnit::block(Arc::from("doc"), 7, block, 200);
        assert_eq!(unit.page_index, 1);
        assert_eq!(unit.id(), "p2-b4");
        assert_eq!(unit.label(), "table block p2-b4 on page 2");
        assert_eq!(unit.metadata().block_type, Some(BlockType::Table));
    }
}
