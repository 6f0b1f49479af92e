//! Scoped blocks.
//!
//! A block is entered through [`GenContext::enter`](crate::context::GenContext::enter).
//! The next time a model is extended under that context the block opens on the
//! model: its start offset is recorded and its opener is applied. Once a later
//! append runs under a context without the block, it closes: the closer is
//! applied and, for a named block, everything from the start offset on is stored
//! as a capture. Named blocks refresh that capture after every append while open.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::model::Fragment;

static NEXT_BLOCK_ID: AtomicU64 = AtomicU64::new(0);

/// A scope with optional boundary fragments and an optional capture name.
///
/// Cloning shares identity; two blocks are equal only if one is a clone of the other.
#[derive(Clone)]
pub struct Block {
    inner: Arc<BlockInner>,
}

struct BlockInner {
    id: u64,
    name: Option<String>,
    opener: Option<Fragment>,
    closer: Option<Fragment>,
}

impl Block {
    pub fn new() -> Self {
        Self::build(None, None, None)
    }

    /// A block whose extent is captured under `name`.
    pub fn named(name: impl Into<String>) -> Self {
        Self::build(Some(name.into()), None, None)
    }

    /// Same block definition with `opener`, as a new block.
    pub fn with_opener(self, opener: impl Into<Fragment>) -> Self {
        Self::build(
            self.inner.name.clone(),
            Some(opener.into()),
            self.inner.closer.clone(),
        )
    }

    /// Same block definition with `closer`, as a new block.
    pub fn with_closer(self, closer: impl Into<Fragment>) -> Self {
        Self::build(
            self.inner.name.clone(),
            self.inner.opener.clone(),
            Some(closer.into()),
        )
    }

    fn build(name: Option<String>, opener: Option<Fragment>, closer: Option<Fragment>) -> Self {
        Self {
            inner: Arc::new(BlockInner {
                id: NEXT_BLOCK_ID.fetch_add(1, Ordering::Relaxed),
                name,
                opener,
                closer,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn opener(&self) -> Option<&Fragment> {
        self.inner.opener.as_ref()
    }

    pub fn closer(&self) -> Option<&Fragment> {
        self.inner.closer.as_ref()
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Block {}

impl Hash for Block {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("opener", &self.inner.opener)
            .field("closer", &self.inner.closer)
            .finish()
    }
}
