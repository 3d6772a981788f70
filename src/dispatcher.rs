//! The read/invoke/write loop.
//!
//! Frames are decoded strictly in arrival order by one loop. Each request with
//! a correlation id runs as its own task; requests without one (and every
//! request in [`Concurrency::Serial`] mode) are answered before the next frame
//! is decoded. All results funnel through one channel into a single writer
//! task, so frames never interleave.

use std::sync::Arc;

use log::{debug, error, info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinSet;

use crate::codec::{CodecError, FrameReader, FrameWriter};
use crate::config::{Concurrency, Config};
use crate::types::{InvocationRequest, InvocationResult};
use crate::{Handler, HandlerError};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("decode input: {0}")]
    Decode(#[from] CodecError),
    #[error("output writer stopped: {0}")]
    Writer(#[source] tokio::task::JoinError),
}

/// A result on its way to the writer, with an optional acknowledgement that
/// fires once the frame has been flushed.
struct Outbound {
    result: InvocationResult,
    flushed: Option<oneshot::Sender<()>>,
}

pub struct Dispatcher<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    concurrency: Concurrency,
    max_in_flight: Option<usize>,
}

impl<R, W> Dispatcher<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            concurrency: Concurrency::default(),
            max_in_flight: None,
        }
    }

    pub fn with_config(self, config: &Config) -> Self {
        self.concurrency(config.concurrency)
            .max_in_flight(config.max_in_flight)
    }

    pub fn concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn max_in_flight(mut self, limit: Option<usize>) -> Self {
        self.max_in_flight = limit;
        self
    }

    /// Serves requests until the input ends or a frame fails to decode.
    ///
    /// In both cases every invocation already started is awaited and its
    /// result written before this returns. A decode failure is returned as
    /// the error; handler failures never are.
    pub async fn run<H: Handler>(self, handler: H) -> Result<(), DispatchError> {
        let Dispatcher {
            mut reader,
            writer,
            concurrency,
            max_in_flight,
        } = self;

        let handler = Arc::new(handler);
        let limit = max_in_flight.map(|n| Arc::new(Semaphore::new(n)));
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(writer, rx));
        let mut in_flight = JoinSet::new();

        info!("dispatcher started ({:?})", concurrency);

        let outcome = loop {
            let request = match reader.next_frame().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    debug!("input closed");
                    break Ok(());
                }
                Err(e) => {
                    error!("error decoding input: {}", e);
                    break Err(DispatchError::Decode(e));
                }
            };

            // reap finished tasks so the set does not grow without bound
            while in_flight.try_join_next().is_some() {}

            let lockstep = concurrency == Concurrency::Serial || request.id.is_none();
            if lockstep {
                let result = invoke(Arc::clone(&handler), request).await;
                let (flushed_tx, flushed_rx) = oneshot::channel();
                let sent = tx.send(Outbound {
                    result,
                    flushed: Some(flushed_tx),
                });
                if sent.is_ok() {
                    // an Err here means the writer has gone away; the join below reports it
                    let _ = flushed_rx.await;
                }
                continue;
            }

            let permit = match &limit {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => None,
                },
                None => None,
            };
            let handler = Arc::clone(&handler);
            let tx = tx.clone();
            in_flight.spawn(async move {
                let result = invoke(handler, request).await;
                let _ = tx.send(Outbound {
                    result,
                    flushed: None,
                });
                drop(permit);
            });
        };

        if !in_flight.is_empty() {
            debug!("waiting for {} in-flight invocations", in_flight.len());
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                warn!("invocation task failed: {}", e);
            }
        }

        drop(tx);
        writer_task.await.map_err(DispatchError::Writer)?;
        info!("dispatcher stopped");
        outcome
    }
}

/// Runs one invocation to completion and renders its result frame.
///
/// The handler runs on its own task so a panic is contained to this request.
async fn invoke<H: Handler>(handler: Arc<H>, request: InvocationRequest) -> InvocationResult {
    let InvocationRequest { id, event, context } = request;
    let context = context.unwrap_or_default();
    debug!(
        "invoking id={:?} invokeid={:?}",
        id.as_deref(),
        context.invoke_id
    );

    let task = tokio::spawn(async move {
        let output = handler.handle(event, context).await?;
        serde_json::to_value(output)
            .map_err(|e| HandlerError::plain(format!("encode result: {}", e)))
    });

    let outcome: Result<Value, HandlerError> = match task.await {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(HandlerError::plain("handler panicked")),
        Err(e) => Err(HandlerError::plain(e.to_string())),
    };

    match outcome {
        Ok(value) => InvocationResult::value(id, value),
        Err(e) => {
            debug!("invocation id={:?} failed: {}", id.as_deref(), e);
            InvocationResult::error(id, e)
        }
    }
}

/// Owns the output stream; the only place frames are written.
async fn write_loop<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(Outbound { result, flushed }) = rx.recv().await {
        if let Err(e) = writer.write_frame(&result).await {
            error!("error encoding output: {}", e);
        }
        if let Some(flushed) = flushed {
            let _ = flushed.send(());
        }
    }
}
