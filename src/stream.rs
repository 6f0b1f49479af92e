//! Streaming controller.
//!
//! [`ModelStream`] is a deferred chain of appends. [`ModelStream::start`] runs the
//! chain on one blocking worker and returns a [`StreamHandle`] that yields every
//! node the chain produces, in order, through a bounded queue.
//!
//! The worker always finishes by queueing `Done`, the error, or its panic payload.
//! A consumer whose wait times out keeps waiting while the worker is alive and
//! stops only once the worker has exited with nothing left in the queue. There is
//! no cancellation: dropping the handle leaves the worker to run the whole chain
//! to completion unobserved, its later nodes discarded.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::stream::{self, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::GuidanceConfig;
use crate::context::GenContext;
use crate::error::Error;
use crate::model::{Fragment, Model};

pub(crate) enum StreamEvent {
    Node(Model),
    Done,
    Failed(Error),
    Panicked(Box<dyn Any + Send>),
}

impl fmt::Debug for StreamEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamEvent::Node(model) => f.debug_tuple("Node").field(&model.id()).finish(),
            StreamEvent::Done => f.write_str("Done"),
            StreamEvent::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            StreamEvent::Panicked(_) => f.write_str("Panicked"),
        }
    }
}

/// A model plus the fragments to append to it, run when started.
pub struct ModelStream {
    model: Model,
    fragments: Vec<Fragment>,
    timeout: Duration,
    capacity: usize,
}

impl ModelStream {
    pub(crate) fn new(model: Model) -> Self {
        let config = GuidanceConfig::default();
        // Only the synchronous caller echoes.
        let model = if model.echo() { model.with_echo(false) } else { model };
        Self {
            model,
            fragments: Vec::new(),
            timeout: config.stream_timeout(),
            capacity: config.stream_queue_capacity,
        }
    }

    /// Extend the chain with another append.
    pub fn then(mut self, fragment: impl Into<Fragment>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    /// How long [`StreamHandle::next`] waits before checking on the worker.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_config(self, config: &GuidanceConfig) -> Self {
        self.with_timeout(config.stream_timeout())
            .with_capacity(config.stream_queue_capacity)
    }

    /// Spawn the worker. Must be called from within a Tokio runtime.
    pub fn start(self, ctx: &GenContext) -> StreamHandle {
        let (tx, rx) = mpsc::channel(self.capacity);
        let worker_ctx = ctx.with_sink(tx.clone());
        let ModelStream {
            model,
            fragments,
            timeout,
            ..
        } = self;

        let worker = tokio::task::spawn_blocking(move || {
            tracing::debug!(model = model.id(), fragments = fragments.len(), "stream worker started");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_chain(&model, &fragments, &worker_ctx)));
            drop(worker_ctx);

            let event = match outcome {
                Ok(Ok(last)) => {
                    tracing::debug!(model = last.id(), "stream worker finished");
                    StreamEvent::Done
                }
                Ok(Err(err)) => {
                    tracing::debug!(error = %err, "stream worker failed");
                    StreamEvent::Failed(err)
                }
                Err(payload) => {
                    tracing::debug!("stream worker panicked");
                    StreamEvent::Panicked(payload)
                }
            };
            // The consumer may already be gone.
            let _ = tx.blocking_send(event);
        });

        StreamHandle {
            rx,
            worker,
            timeout,
            finished: false,
        }
    }
}

fn run_chain(model: &Model, fragments: &[Fragment], ctx: &GenContext) -> Result<Model, Error> {
    if fragments.is_empty() {
        return model.append("", ctx);
    }
    let mut current = model.clone();
    for fragment in fragments {
        current = current.append(fragment.clone(), ctx)?;
    }
    Ok(current)
}

/// Consumer side of a started [`ModelStream`].
pub struct StreamHandle {
    rx: mpsc::Receiver<StreamEvent>,
    worker: JoinHandle<()>,
    timeout: Duration,
    finished: bool,
}

impl StreamHandle {
    /// The next node, the chain's error, or `None` once the chain is done.
    ///
    /// # Panics
    ///
    /// Resumes a panic raised by the worker.
    pub async fn next(&mut self) -> Option<Result<Model, Error>> {
        while !self.finished {
            match tokio::time::timeout(self.timeout, self.rx.recv()).await {
                Ok(Some(event)) => return self.deliver(event),
                Ok(None) => self.finished = true,
                Err(_) => {
                    if !self.worker.is_finished() {
                        tracing::trace!(timeout = ?self.timeout, "stream worker still running");
                        continue;
                    }
                    match self.rx.try_recv() {
                        Ok(event) => return self.deliver(event),
                        Err(_) => {
                            tracing::warn!("stream worker exited without signalling completion");
                            self.finished = true;
                        }
                    }
                }
            }
        }
        None
    }

    fn deliver(&mut self, event: StreamEvent) -> Option<Result<Model, Error>> {
        match event {
            StreamEvent::Node(model) => Some(Ok(model)),
            StreamEvent::Done => {
                self.finished = true;
                None
            }
            StreamEvent::Failed(err) => {
                self.finished = true;
                Some(Err(err))
            }
            StreamEvent::Panicked(payload) => {
                self.finished = true;
                panic::resume_unwind(payload)
            }
        }
    }

    /// Adapt the handle into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = Result<Model, Error>> {
        stream::unfold(self, |mut handle| async move {
            let item = handle.next().await?;
            Some((item, handle))
        })
    }
}
