//! `EventStream`, a background task turning committed blocks into
//! connector [`Event`]s.
//!
//! The task pulls blocks from a [`BlockFeed`], extracts connector events,
//! hands them to the consumer over a bounded channel, and checkpoints every
//! block once its events were all handed off. [`EventStream::done`] stops
//! the task and releases the feed and checkpointer exactly once.

use std::fmt;
use std::sync::{Arc, Mutex};

use connectorhub_core::{BlockCheckpointer, ConnectorError, MemoryCheckpointer};
use connectorhub_fabric::ConnectorEventUnmarshaler;
use connectorhub_storage::FileCheckpointer;
use futures::StreamExt;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::event::Event;
use crate::feed::{block_number, BlockFeed, BlockStream};
use crate::sink::{CallbackSink, LoggingSink};

/// Lifecycle of an [`EventStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Running,
    /// Cancelled or the feed ended; resources are being released.
    Draining,
    Closed,
}

/// Optional collaborators for [`EventStream::start`].
#[derive(Default, Clone)]
pub struct StreamOptions {
    sink: Option<Arc<dyn CallbackSink>>,
    checkpointer: Option<Arc<dyn BlockCheckpointer>>,
}

impl StreamOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Where event callbacks are delivered (logged and dropped when unset).
    pub fn with_sink(mut self, sink: Arc<dyn CallbackSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Use this checkpointer instead of one derived from the config.
    pub fn with_checkpointer(mut self, checkpointer: Arc<dyn BlockCheckpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("sink", &self.sink.is_some())
            .field("checkpointer", &self.checkpointer.is_some())
            .finish()
    }
}

/// State shared by the stream handle and its task.
struct Shared {
    feed: Arc<dyn BlockFeed>,
    checkpointer: Arc<dyn BlockCheckpointer>,
    state: Mutex<StreamState>,
    closed: OnceCell<Result<(), StreamError>>,
}

impl Shared {
    fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: StreamState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != StreamState::Closed {
            *state = next;
        }
    }

    /// Release the feed and checkpointer. Runs once; later callers get the
    /// first outcome.
    async fn close(&self) -> Result<(), StreamError> {
        self.closed
            .get_or_init(|| async {
                self.set_state(StreamState::Draining);
                let feed = self.feed.close().await;
                let checkpoint = self.checkpointer.close().await.map_err(StreamError::from);
                self.set_state(StreamState::Closed);

                let result = feed.and(checkpoint);
                match &result {
                    Ok(()) => debug!("event stream closed"),
                    Err(e) => error!(error = %e, "event stream close"),
                }
                result
            })
            .await
            .clone()
    }
}

/// A running stream of connector events.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use connectorhub_stream::{EventStream, FileFeed, StreamConfig, StreamOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let feed = Arc::new(FileFeed::new("blocks.bin"));
/// let config = StreamConfig::new("sandbox", "Org1MSP");
/// let stream = EventStream::start(feed, config, StreamOptions::new()).await?;
///
/// while let Some(event) = stream.recv().await {
///     match event.request_body() {
///         Ok(_body) => event.callback(br#"{"status":"OK"}"#, None).await?,
///         Err(e) => event.callback(b"", Some(&e)).await?,
///     }
/// }
/// stream.done().await?;
/// # Ok(())
/// # }
/// ```
pub struct EventStream {
    events: tokio::sync::Mutex<Option<mpsc::Receiver<Event>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<Shared>,
    done: OnceCell<Result<(), StreamError>>,
}

impl EventStream {
    /// Subscribe to `feed` and spawn the consumption task.
    ///
    /// Fails without spawning anything when the config is invalid, the
    /// checkpoint file cannot be opened, or the subscription is refused.
    pub async fn start(
        feed: Arc<dyn BlockFeed>,
        config: StreamConfig,
        opts: StreamOptions,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let checkpointer: Arc<dyn BlockCheckpointer> = match (opts.checkpointer, &config.checkpoint_file) {
            (Some(cp), _) => cp,
            (None, Some(path)) => {
                let cp = FileCheckpointer::open(path).await?;
                info!(path = %path.display(), cursor = %cp.cursor(), "loaded checkpoint file");
                Arc::new(cp)
            }
            (None, None) => Arc::new(MemoryCheckpointer::new()),
        };
        let sink = opts.sink.unwrap_or_else(|| Arc::new(LoggingSink));

        let shared = Arc::new(Shared {
            feed,
            checkpointer,
            state: Mutex::new(StreamState::Created),
            closed: OnceCell::new(),
        });

        let start_block = shared.checkpointer.cursor().resume_from(config.start_block);
        debug!(start_block, "listen to block events");
        let blocks = shared.feed.subscribe(start_block).await?;

        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let cancel = CancellationToken::new();
        let worker = Worker {
            shared: shared.clone(),
            unmarshaler: ConnectorEventUnmarshaler::new(config.chaincode_id, config.msp_id),
            sink,
            events: tx,
            cancel: cancel.clone(),
        };
        shared.set_state(StreamState::Running);
        let task = tokio::spawn(worker.run(blocks));

        Ok(Self {
            events: tokio::sync::Mutex::new(Some(rx)),
            cancel,
            task: Mutex::new(Some(task)),
            shared,
            done: OnceCell::new(),
        })
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Take the event receiver.
    ///
    /// Returns `None` after the first call, and also while a
    /// [`recv`](Self::recv) is waiting, since that call holds the receiver.
    pub fn listen(&self) -> Option<mpsc::Receiver<Event>> {
        self.events.try_lock().ok()?.take()
    }

    /// Next event; `None` once the stream ended or the receiver was taken
    /// with [`listen`](Self::listen).
    ///
    /// The receiver stays locked until an event arrives, so concurrent
    /// `recv` calls queue up behind each other.
    pub async fn recv(&self) -> Option<Event> {
        match self.events.lock().await.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Stop the stream and wait until its resources are released.
    ///
    /// Safe to call repeatedly and concurrently; every call returns the
    /// outcome of the first.
    pub async fn done(&self) -> Result<(), StreamError> {
        self.done
            .get_or_init(|| async {
                debug!("exiting event stream");
                self.cancel.cancel();

                let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
                let joined = match task {
                    Some(handle) => handle.await.map_err(|e| StreamError::Task(e.to_string())),
                    None => Ok(()),
                };
                let closed = self.shared.close().await;
                joined.and(closed)
            })
            .await
            .clone()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct Worker {
    shared: Arc<Shared>,
    unmarshaler: ConnectorEventUnmarshaler,
    sink: Arc<dyn CallbackSink>,
    events: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, mut blocks: BlockStream) {
        'blocks: loop {
            let blk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("event stream cancelled");
                    break;
                }
                next = blocks.next() => match next {
                    Some(blk) => blk,
                    None => {
                        info!("feed ended");
                        break;
                    }
                },
            };

            let block_no = block_number(&blk);
            debug!(block_no, "received block");
            let found = match self.unmarshaler.unmarshal(&blk) {
                Ok(found) => found,
                Err(e) => {
                    error!(block_no, error = %e, "unmarshal connector events");
                    continue;
                }
            };
            if !found.is_empty() {
                info!(block_no, num_events = found.len(), "processing luther events");
            }

            for cevent in found {
                let event = Event::new(cevent, self.sink.clone());
                if let Err(e) = self.send(event).await {
                    if e.is_cancelled() {
                        debug!(block_no, "event stream cancelled mid-block");
                    } else {
                        debug!(block_no, error = %e, "stop sending events");
                    }
                    break 'blocks;
                }
            }

            if let Err(e) = self.shared.checkpointer.checkpoint_block(block_no).await {
                error!(block_no, error = %e, "failed to checkpoint block");
            }
        }

        self.shared.set_state(StreamState::Draining);
        drop(self.events);
        // Outcome is logged by close and returned from done().
        let _ = self.shared.close().await;
    }
}

impl Worker {
    /// Hand `event` to the consumer, waiting for channel capacity.
    async fn send(&self, event: Event) -> Result<(), ConnectorError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectorError::Cancelled),
            sent = self.events.send(event) => sent
                .map_err(|_| ConnectorError::Infrastructure("event receiver dropped".into())),
        }
    }
}
