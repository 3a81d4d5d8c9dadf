//! Interfaces to the host image container.
//!
//! The core never touches disk. Frames arrive through [`FrameSource`] and
//! stacked products leave through [`StackSink`], which also answers the
//! already-exists query that lets an interrupted sweep resume without
//! redoing work. The host application is expected to back these with its
//! container format of choice.

use std::collections::BTreeMap;

use crate::types::{Frame, StackProduct, StackResult};

/// Supplier of the ordered frame list for one pointing/filter selection.
pub trait FrameSource {
    fn frames(&mut self) -> StackResult<Vec<Frame>>;
}

/// Consumer of stacked products.
pub trait StackSink {
    /// Whether an output with this identifier already exists.
    fn contains(&self, id: &str) -> bool;

    /// Persist one stacked product under `id`. The product's provenance
    /// renders to header cards via
    /// [`StackProvenance::header_cards`](crate::types::StackProvenance::header_cards).
    fn write(&mut self, id: &str, product: &StackProduct) -> StackResult<()>;
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    products: BTreeMap<String, StackProduct>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StackProduct> {
        self.products.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.products.keys().map(String::as_str)
    }
}

impl StackSink for MemorySink {
    fn contains(&self, id: &str) -> bool {
        self.products.contains_key(id)
    }

    fn write(&mut self, id: &str, product: &StackProduct) -> StackResult<()> {
        log::debug!("storing stack {}", id);
        self.products.insert(id.to_string(), product.clone());
        Ok(())
    }
}
