use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::completion::CompletionHandle;
use crate::config::ConnectionConfig;
use crate::cql::codec::CqlFrameCodec;
use crate::cql::frame::Frame;
use crate::cql::header::{HeaderFlags, ProtocolVersion};
use crate::cql::request::Request;
use crate::cql::response::Response;
use crate::error::{CallError, CodecError, RequestError, SendError};
use crate::mux::{spawn_timeout_sweeper, Multiplexer};

/// A multiplexed client connection over any byte stream.
///
/// Background tasks write queued frames, read responses and sweep expired
/// requests. They stop when the connection is closed or dropped, or when the
/// peer goes away; outstanding requests then fail with
/// [`RequestError::ConnectionClosed`] or the transport error.
pub struct Connection {
    config: ConnectionConfig,
    mux: Arc<Multiplexer<Response>>,
    outbound: mpsc::UnboundedSender<Frame>,
    events: Option<mpsc::Receiver<Response>>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Start driving `io`. Must be called from within a tokio runtime.
    pub fn new<IO>(io: IO, config: ConnectionConfig) -> Connection
    where
        IO: AsyncRead + AsyncWrite + Send + 'static,
    {
        let mux = Arc::new(Multiplexer::new(config.stream_capacity()));
        let framed = Framed::new(io, CqlFrameCodec::with_max_frame_size(config.max_frame_size));
        let (sink, stream) = futures::StreamExt::split(framed);

        let (outbound, queued) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let shutdown = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(write_frames(
                sink,
                queued,
                Arc::clone(&mux),
                shutdown.clone(),
            )),
            tokio::spawn(read_frames(
                stream,
                Arc::clone(&mux),
                event_tx,
                shutdown.clone(),
            )),
            spawn_timeout_sweeper(
                Arc::clone(&mux),
                config.sweep_interval,
                shutdown.child_token(),
            ),
        ];

        debug!(
            version = %config.protocol_version,
            streams = mux.capacity(),
            "connection started"
        );

        Connection {
            config,
            mux,
            outbound,
            events: Some(event_rx),
            shutdown,
            tasks,
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.config.protocol_version
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn multiplexer(&self) -> &Arc<Multiplexer<Response>> {
        &self.mux
    }

    pub fn outstanding(&self) -> usize {
        self.mux.outstanding()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbound.is_closed()
    }

    pub fn send(&self, request: &Request) -> Result<CompletionHandle<Response>, SendError> {
        self.send_with_flags(request, HeaderFlags::empty())
    }

    /// Queue `request` on a fresh stream id and return its completion handle.
    ///
    /// Running out of stream ids is reported here rather than through the
    /// handle. The configured request timeout is armed before the frame is
    /// queued.
    pub fn send_with_flags(
        &self,
        request: &Request,
        flags: HeaderFlags,
    ) -> Result<CompletionHandle<Response>, SendError> {
        self.submit_with_flags(request, flags).map(PendingRequest::into_handle)
    }

    pub fn submit(&self, request: &Request) -> Result<PendingRequest, SendError> {
        self.submit_with_flags(request, HeaderFlags::empty())
    }

    /// Like [`send_with_flags`](Connection::send_with_flags), but keeps the
    /// stream id so a timed out wait can give it back.
    pub fn submit_with_flags(
        &self,
        request: &Request,
        flags: HeaderFlags,
    ) -> Result<PendingRequest, SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let deadline = self
            .config
            .request_timeout
            .map(|timeout| Instant::now() + timeout);
        let (stream_id, handle) = self.mux.allocate(deadline)?;

        let frame = match request.serialize_as_frame(self.config.protocol_version, stream_id, flags)
        {
            Ok(frame) => frame,
            Err(error) => {
                self.mux.cancel(stream_id);
                return Err(error.into());
            }
        };

        trace!(stream_id, opcode = %request.opcode(), "queueing request");
        if self.outbound.send(frame).is_err() {
            self.mux.cancel(stream_id);
            return Err(SendError::Closed);
        }

        // the reader may have failed everything between the check above and
        // the allocation
        if self.shutdown.is_cancelled() {
            self.mux
                .fail_handle(stream_id, &handle, RequestError::ConnectionClosed);
            return Err(SendError::Closed);
        }

        Ok(PendingRequest {
            stream_id,
            handle,
            mux: Arc::clone(&self.mux),
        })
    }

    /// Send `request` and wait for its response.
    pub async fn call(&self, request: &Request) -> Result<Response, CallError> {
        Ok(self.send(request)?.await?)
    }

    /// Send `request` and wait at most `timeout` for its response. The stream
    /// id is released when the wait runs out.
    pub async fn call_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, CallError> {
        Ok(self.submit(request)?.timeout(timeout).await?)
    }

    /// Give up on the request using `stream_id`. A response that still
    /// arrives for it is dropped.
    pub fn cancel(&self, stream_id: i16) -> bool {
        self.mux.cancel(stream_id)
    }

    /// Server pushed EVENT frames. Available once; `None` afterwards.
    pub fn events(&mut self) -> Option<ReceiverStream<Response>> {
        self.events.take().map(ReceiverStream::new)
    }

    /// Stop the background tasks. Outstanding requests fail with
    /// [`RequestError::ConnectionClosed`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Close and wait for the background tasks to finish.
    pub async fn shutdown(mut self) {
        self.close();
        for task in self.tasks.drain(..) {
            if let Err(error) = task.await {
                warn!(%error, "connection task failed");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// A request queued on a [`Connection`].
///
/// Unlike the bare [`CompletionHandle`], a wait through this type that runs
/// out of time times the request out and frees its stream id.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    stream_id: i16,
    handle: CompletionHandle<Response>,
    mux: Arc<Multiplexer<Response>>,
}

impl PendingRequest {
    pub fn stream_id(&self) -> i16 {
        self.stream_id
    }

    pub fn handle(&self) -> &CompletionHandle<Response> {
        &self.handle
    }

    pub fn into_handle(self) -> CompletionHandle<Response> {
        self.handle
    }

    /// Block until the response arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Response, RequestError> {
        match self.handle.wait(timeout) {
            Err(RequestError::Timeout) if !self.handle.is_resolved() => {
                self.expire();
                self.handle.wait(None)
            }
            result => result,
        }
    }

    pub async fn timeout(&self, timeout: Duration) -> Result<Response, RequestError> {
        match tokio::time::timeout(timeout, self.handle.clone()).await {
            Ok(result) => result,
            Err(_) => {
                self.expire();
                self.handle.clone().await
            }
        }
    }

    /// Whatever resolves first, this expiry or a response, is what waiters see.
    fn expire(&self) {
        if self.mux.expire_handle(self.stream_id, &self.handle) {
            debug!(stream_id = self.stream_id, "request timed out while awaited");
        }
    }
}

async fn write_frames<S>(
    mut sink: S,
    mut queued: mpsc::UnboundedReceiver<Frame>,
    mux: Arc<Multiplexer<Response>>,
    shutdown: CancellationToken,
) where
    S: Sink<Frame, Error = CodecError> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            frame = queued.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let stream_id = frame.stream_id();
        match sink.send(frame).await {
            Ok(()) => {}
            Err(CodecError::Frame(error)) => {
                warn!(stream_id, %error, "failed to encode request");
                mux.resolve(stream_id, Err(error.into()));
            }
            Err(CodecError::Io(error)) => {
                warn!(%error, "failed to write to connection");
                mux.fail_all(error.into());
                shutdown.cancel();
                break;
            }
        }
    }

    // nothing still queued will be written
    queued.close();
    while let Ok(frame) = queued.try_recv() {
        mux.fail(frame.stream_id(), RequestError::ConnectionClosed);
    }

    debug!("writer stopped");
}

async fn read_frames<S>(
    mut stream: S,
    mux: Arc<Multiplexer<Response>>,
    events: mpsc::Sender<Response>,
    shutdown: CancellationToken,
) where
    S: Stream<Item = Result<Frame, CodecError>> + Unpin,
{
    let cause: RequestError = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break RequestError::ConnectionClosed,
            next = stream.next() => match next {
                Some(Ok(frame)) => dispatch(&mux, &events, frame),
                Some(Err(error)) => {
                    warn!(%error, "failed to read from connection");
                    break error.into();
                }
                None => {
                    debug!("connection closed by peer");
                    break RequestError::ConnectionClosed;
                }
            },
        }
    };

    shutdown.cancel();
    mux.fail_all(cause);
    debug!("reader stopped");
}

fn dispatch(mux: &Multiplexer<Response>, events: &mpsc::Sender<Response>, frame: Frame) {
    let stream_id = frame.stream_id();
    let response = Response::from_frame(frame);

    if stream_id < 0 {
        match response {
            Ok(event) if event.is_event() => match events.try_send(event) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("event channel is full, dropping event"),
                Err(TrySendError::Closed(_)) => trace!("no event listener, dropping event"),
            },
            Ok(other) => warn!(stream_id, opcode = %other.opcode, "ignoring unsolicited response"),
            Err(error) => warn!(stream_id, %error, "failed to decode event"),
        }
        return;
    }

    let result = response
        .map_err(RequestError::from)
        .and_then(|response| match response.server_error() {
            Some(Ok(error)) => Err(RequestError::Server(error)),
            Some(Err(error)) => Err(RequestError::Frame(error)),
            None => Ok(response),
        });

    trace!(stream_id, ok = result.is_ok(), "dispatching response");
    mux.resolve(stream_id, result);
}
