//! Versioned generation state tree.
//!
//! A [`Model`] is an immutable node: rendered text, captures, open blocks and a
//! token count. Every operation returns a new node with a fresh id whose parent is
//! the node it was derived from; the original is never touched. Node creation is
//! recorded in a [`TraceArena`] shared by the whole tree, which is how lineage
//! queries (metrics, latency) walk back to the root.
//!
//! ```ignore
//! let lm = Model::new(Arc::new(EngineClient::new(oracle)));
//! let ctx = GenContext::new();
//! let lm = lm.append("Answer: ", &ctx)?.append(capture("n", json_integer()), &ctx)?;
//! assert_eq!(lm.get("n").and_then(|c| c.as_scalar()), Some(&"42".to_string()));
//! ```

mod chunk;
mod client;
mod state;
mod trace;

pub use chunk::{CaptureOutput, Chunk, RoleMarker, TextOutput};
pub use client::{Client, EngineClient, LogitsOracle};
pub use state::State;
pub use trace::{NodeId, Renderer, TraceArena, TraceMessage, TraceNode};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::block::Block;
use crate::config::GuidanceConfig;
use crate::context::GenContext;
use crate::error::Error;
use crate::grammar::Grammar;
use crate::parser::Capture;
use crate::stream::ModelStream;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

fn next_node_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

pub type StatefulFn = dyn Fn(&Model, &GenContext) -> Result<Model, Error> + Send + Sync;

/// Anything that can be appended to a model.
#[derive(Clone)]
pub enum Fragment {
    Grammar(Grammar),
    RoleOpener(RoleMarker),
    RoleCloser(RoleMarker),
    /// A function of the current node, run in place of a grammar.
    Stateful(Arc<StatefulFn>),
}

impl Fragment {
    pub fn stateful(
        f: impl Fn(&Model, &GenContext) -> Result<Model, Error> + Send + Sync + 'static,
    ) -> Self {
        Fragment::Stateful(Arc::new(f))
    }

    fn is_empty(&self) -> bool {
        matches!(self, Fragment::Grammar(g) if g.is_empty())
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fragment::Grammar(g) => write!(f, "Grammar({g})"),
            Fragment::RoleOpener(m) => write!(f, "RoleOpener({:?})", m.role),
            Fragment::RoleCloser(m) => write!(f, "RoleCloser({:?})", m.role),
            Fragment::Stateful(_) => write!(f, "Stateful(..)"),
        }
    }
}

impl From<Grammar> for Fragment {
    fn from(grammar: Grammar) -> Self {
        Fragment::Grammar(grammar)
    }
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::Grammar(text.into())
    }
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Fragment::Grammar(text.into())
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Node {
    id: NodeId,
    parent_id: Option<NodeId>,
    state: State,
    /// Blocks open on this node with their start offsets, oldest first.
    active_blocks: Vec<(Block, usize)>,
    token_count: usize,
    echo: bool,
    client: Arc<dyn Client>,
    trace: Arc<TraceArena>,
}

/// A node of the generation tree. Cheap to clone; equality is identity.
#[derive(Clone)]
pub struct Model {
    inner: Arc<Node>,
}

impl Model {
    /// A root node with empty text, echoing enabled.
    pub fn new(client: Arc<dyn Client>) -> Self {
        Self::root(client, true)
    }

    /// A root node that echoes according to `config`.
    pub fn from_config(client: Arc<dyn Client>, config: &GuidanceConfig) -> Self {
        Self::root(client, config.echo)
    }

    fn root(client: Arc<dyn Client>, echo: bool) -> Self {
        let node = Node {
            id: next_node_id(),
            parent_id: None,
            state: State::new(),
            active_blocks: Vec::new(),
            token_count: 0,
            echo,
            client,
            trace: Arc::new(TraceArena::new()),
        };
        node.trace.record(node.id, None, None);
        Self {
            inner: Arc::new(node),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn parent_id(&self) -> Option<NodeId> {
        self.inner.parent_id
    }

    pub fn text(&self) -> String {
        self.inner.state.text().into_owned()
    }

    pub fn bytes(&self) -> &[u8] {
        self.inner.state.bytes()
    }

    /// Length of the rendered text in bytes.
    pub fn len(&self) -> usize {
        self.inner.state.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> &State {
        &self.inner.state
    }

    pub fn token_count(&self) -> usize {
        self.inner.token_count
    }

    pub fn echo(&self) -> bool {
        self.inner.echo
    }

    pub fn trace(&self) -> &Arc<TraceArena> {
        &self.inner.trace
    }

    pub fn active_role(&self) -> Option<&str> {
        self.inner.state.active_role()
    }

    /// Blocks currently open on this node.
    pub fn active_blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.inner.active_blocks.iter().map(|(block, _)| block)
    }

    pub fn get(&self, key: &str) -> Option<&Capture<String>> {
        self.inner.state.captures().get(key)
    }

    pub fn get_or(&self, key: &str, default: impl Into<Capture<String>>) -> Capture<String> {
        match self.get(key) {
            Some(value) => value.clone(),
            None => default.into(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.captures().contains(key)
    }

    pub fn log_prob(&self, key: &str) -> Option<&Capture<Option<f64>>> {
        self.inner.state.captures().log_prob(key)
    }

    pub fn log_prob_or(&self, key: &str, default: Capture<Option<f64>>) -> Capture<Option<f64>> {
        self.log_prob(key).cloned().unwrap_or(default)
    }

    /// A new node with `key` set to `value` and no log-probability.
    pub fn set(&self, key: &str, value: impl Into<Capture<String>>) -> Model {
        let value = value.into();
        let log_prob = value.map(|_| None);
        let mut node = self.derive();
        node.state.captures_mut().set(key, value, log_prob);
        self.commit(node, None, None)
    }

    /// A new node without `key`.
    pub fn remove(&self, key: &str) -> Result<Model, Error> {
        let mut node = self.derive();
        if node.state.captures_mut().remove(key).is_none() {
            return Err(Error::MissingCapture(key.to_string()));
        }
        Ok(self.commit(node, None, None))
    }

    /// A new node with echoing turned on or off.
    pub fn with_echo(&self, echo: bool) -> Model {
        let mut node = self.derive();
        node.echo = echo;
        self.commit(node, None, None)
    }

    /// Extend the model with `fragment` under `ctx`.
    ///
    /// Blocks are reconciled against `ctx` first. Appending an empty grammar only
    /// reconciles blocks.
    pub fn append(&self, fragment: impl Into<Fragment>, ctx: &GenContext) -> Result<Model, Error> {
        let model = self.apply_blocks(ctx)?;
        let fragment = fragment.into();
        if fragment.is_empty() {
            return Ok(model);
        }
        if let Fragment::Stateful(f) = &fragment {
            return f(&model, ctx);
        }
        let model = model.apply_fragment(&fragment, ctx)?;
        Ok(model.update_open_block_captures())
    }

    /// A deferred run of this model; see [`ModelStream`].
    pub fn stream(&self) -> ModelStream {
        ModelStream::new(self.clone())
    }

    // -----------------------------------------------------------------------
    // Node creation
    // -----------------------------------------------------------------------

    fn derive(&self) -> Node {
        let mut node = (*self.inner).clone();
        node.id = next_node_id();
        node.parent_id = Some(self.inner.id);
        node
    }

    fn commit(&self, node: Node, attr: Option<Chunk>, ctx: Option<&GenContext>) -> Model {
        if node.echo {
            if let Some(renderer) = ctx.and_then(|c| c.renderer()) {
                renderer.update(TraceMessage {
                    trace_id: node.id,
                    parent_trace_id: node.parent_id,
                    attr: attr.clone(),
                });
            }
        }
        node.trace.record(node.id, node.parent_id, attr);
        Model {
            inner: Arc::new(node),
        }
    }

    fn apply_chunk(&self, chunk: Chunk, ctx: &GenContext) -> Model {
        let mut node = self.derive();
        node.state.apply_chunk(&chunk);
        if let Chunk::Text(text) = &chunk {
            node.token_count += text.token_count;
        }
        let model = self.commit(node, Some(chunk), Some(ctx));
        ctx.publish(&model);
        model
    }

    fn apply_fragment(&self, fragment: &Fragment, ctx: &GenContext) -> Result<Model, Error> {
        match fragment {
            Fragment::Grammar(grammar) => {
                let mut current = self.clone();
                self.inner
                    .client
                    .run(&self.inner.state, grammar, &mut |chunk| {
                        current = current.apply_chunk(chunk, ctx);
                    })?;
                Ok(current)
            }
            Fragment::RoleOpener(marker) => Ok(self.apply_chunk(Chunk::RoleOpener(marker.clone()), ctx)),
            Fragment::RoleCloser(marker) => Ok(self.apply_chunk(Chunk::RoleCloser(marker.clone()), ctx)),
            Fragment::Stateful(_) => Err(Error::Unsupported(
                "stateful block opener/closer functions are".to_string(),
            )),
        }
    }

    // -----------------------------------------------------------------------
    // Blocks
    // -----------------------------------------------------------------------

    /// Text from byte offset `start` to the end.
    fn text_from(&self, start: usize) -> String {
        let bytes = self.bytes();
        String::from_utf8_lossy(&bytes[start.min(bytes.len())..]).into_owned()
    }

    fn apply_blocks(&self, ctx: &GenContext) -> Result<Model, Error> {
        let mut model = self.clone();

        for (block, start) in self.inner.active_blocks.iter().rev() {
            if !ctx.is_active(block) {
                tracing::debug!(block = block.id(), name = ?block.name(), "closing block");
                let mut node = model.derive();
                node.active_blocks.retain(|(b, _)| b != block);
                model = model.commit(node, None, None);
                if let Some(closer) = block.closer() {
                    model = model.apply_fragment(closer, ctx)?;
                }
            }
            if let Some(name) = block.name() {
                model = model.set(name, model.text_from(*start));
            }
        }

        for block in ctx.blocks() {
            if model.inner.active_blocks.iter().any(|(b, _)| b == block) {
                continue;
            }
            tracing::debug!(block = block.id(), name = ?block.name(), start = model.len(), "opening block");
            let mut node = model.derive();
            node.active_blocks.push((block.clone(), model.len()));
            model = model.commit(node, None, None);
            if let Some(opener) = block.opener() {
                model = model.apply_fragment(opener, ctx)?;
            }
        }

        Ok(model)
    }

    fn update_open_block_captures(&self) -> Model {
        let mut model = self.clone();
        for (block, start) in &self.inner.active_blocks {
            if let Some(name) = block.name() {
                model = model.set(name, model.text_from(*start));
            }
        }
        model
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.state.text())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("id", &self.inner.id)
            .field("parent_id", &self.inner.parent_id)
            .field("text", &self.inner.state.text())
            .field("token_count", &self.inner.token_count)
            .finish()
    }
}
