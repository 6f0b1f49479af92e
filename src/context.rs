//! Generation context.
//!
//! Everything a model append depends on besides the node itself: which blocks are
//! active, where new nodes are published for streaming and where echoing nodes are
//! rendered. Contexts are values; every method returns a new one, and a stream
//! worker gets its own copy.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::block::Block;
use crate::model::{Model, Renderer};
use crate::stream::StreamEvent;

#[derive(Clone, Default)]
pub struct GenContext {
    blocks: Vec<Block>,
    sinks: Vec<mpsc::Sender<StreamEvent>>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl GenContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context in which `block` is active, after every block already active.
    pub fn enter(&self, block: &Block) -> GenContext {
        let mut ctx = self.clone();
        if !ctx.blocks.contains(block) {
            ctx.blocks.push(block.clone());
        }
        ctx
    }

    /// A context in which `block` is no longer active.
    pub fn without(&self, block: &Block) -> GenContext {
        let mut ctx = self.clone();
        ctx.blocks.retain(|b| b != block);
        ctx
    }

    pub fn with_renderer(&self, renderer: Arc<dyn Renderer>) -> GenContext {
        let mut ctx = self.clone();
        ctx.renderer = Some(renderer);
        ctx
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn is_active(&self, block: &Block) -> bool {
        self.blocks.contains(block)
    }

    pub fn renderer(&self) -> Option<&Arc<dyn Renderer>> {
        self.renderer.as_ref()
    }

    pub(crate) fn with_sink(&self, sink: mpsc::Sender<StreamEvent>) -> GenContext {
        let mut ctx = self.clone();
        ctx.sinks.push(sink);
        ctx
    }

    /// Hand `model` to every stream listening on this context.
    ///
    /// Blocks while a stream's queue is full. Must not be called from async code.
    pub(crate) fn publish(&self, model: &Model) {
        for sink in &self.sinks {
            // A closed sink means the consumer went away.
            let _ = sink.blocking_send(StreamEvent::Node(model.clone()));
        }
    }
}

impl fmt::Debug for GenContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenContext")
            .field("blocks", &self.blocks)
            .field("sinks", &self.sinks.len())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}
