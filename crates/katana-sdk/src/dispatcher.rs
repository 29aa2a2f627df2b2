use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use katana_frame::{FrameConfig, FrameError, FrameReader, FrameWriter, RequestFrame, ResponseFrame};
use katana_transport::{Endpoint, IpcStream, Listener, TransportError};
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::pool::WorkerPool;
use crate::processor::{Processor, Reply, FRAME_FAILED};

/// Longest the connection loop waits before rechecking the stop flag.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Serves component requests on a socket.
///
/// Each connection gets a reader thread and a loop that owns the writer.
/// Requests run on a shared [`WorkerPool`]; results come back to the loop
/// over a channel, so replies on one connection never interleave.
pub struct Dispatcher {
    listener: Listener,
    processor: Processor,
    config: DispatcherConfig,
    pool: Arc<WorkerPool>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Bind the component socket.
    pub fn bind(endpoint: &Endpoint, processor: Processor, config: DispatcherConfig) -> Result<Self> {
        let listener = Listener::bind(endpoint)?;
        Ok(Self::with_listener(listener, processor, config))
    }

    pub fn with_listener(listener: Listener, processor: Processor, config: DispatcherConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(config.workers));
        Self {
            listener,
            processor,
            config,
            pool,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.listener.endpoint()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// A handle that stops [`Dispatcher::run`] from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            endpoint: self.endpoint(),
        }
    }

    /// Accept connections until stopped.
    pub fn run(&self) -> Result<()> {
        info!(
            endpoint = %self.endpoint(),
            workers = self.pool.size(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            "dispatcher listening"
        );

        while self.running.load(Ordering::SeqCst) {
            let stream = match self.listener.accept() {
                Ok(stream) => stream,
                Err(err) => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!(error = %err, "accept failed");
                    thread::sleep(IDLE_POLL);
                    continue;
                }
            };
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let connection = self.connection();
            let spawned = thread::Builder::new()
                .name("katana-connection".to_string())
                .spawn(move || {
                    if let Err(err) = connection.serve(stream) {
                        warn!(error = %err, "connection ended with an error");
                    }
                });
            if let Err(err) = spawned {
                error!(error = %err, "failed to spawn connection thread");
            }
        }

        info!("dispatcher stopped");
        Ok(())
    }

    /// Serve one already-connected stream on the calling thread.
    pub fn serve_stream(&self, stream: IpcStream) -> Result<()> {
        self.connection().serve(stream)
    }

    fn connection(&self) -> Connection {
        Connection {
            processor: self.processor.clone(),
            pool: Arc::clone(&self.pool),
            timeout: self.config.timeout,
            frame: self.config.frame.clone(),
            running: Arc::clone(&self.running),
        }
    }
}

/// Stops a running [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    endpoint: Endpoint,
}

impl StopHandle {
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            debug!(endpoint = %self.endpoint, "stopping dispatcher");
            katana_transport::wake(&self.endpoint);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

enum Event {
    Request(RequestFrame),
    Malformed(u32),
    Completed(ResponseFrame),
    Closed,
}

struct Connection {
    processor: Processor,
    pool: Arc<WorkerPool>,
    timeout: Duration,
    frame: FrameConfig,
    running: Arc<AtomicBool>,
}

impl Connection {
    fn serve(&self, stream: IpcStream) -> Result<()> {
        let kind = stream.kind();
        debug!(kind, peer_pid = ?stream.peer_pid(), "connection accepted");

        // Idle connections are fine; only writes are bounded.
        let read_config = FrameConfig {
            read_timeout: None,
            ..self.frame.clone()
        };
        let reader = FrameReader::with_config_ipc(stream.try_clone()?, read_config)?;
        let mut writer = FrameWriter::with_config_ipc(stream, self.frame.clone())?;

        let (events, inbox) = mpsc::channel();
        let reader_events = events.clone();
        let reader_thread = thread::Builder::new()
            .name("katana-reader".to_string())
            .spawn(move || read_requests(reader, &reader_events))
            .map_err(TransportError::Io)?;

        let mut pending: HashMap<u32, Instant> = HashMap::new();
        let outcome = loop {
            if !self.running.load(Ordering::SeqCst) {
                break Ok(());
            }

            let now = Instant::now();
            let wait = pending
                .values()
                .min()
                .map_or(IDLE_POLL, |deadline| deadline.saturating_duration_since(now))
                .min(IDLE_POLL);

            let reply = match inbox.recv_timeout(wait) {
                Ok(Event::Request(request)) => self.dispatch(request, &events, &mut pending),
                Ok(Event::Completed(response)) => {
                    if pending.remove(&response.request_id).is_some() {
                        Some(response)
                    } else {
                        debug!(request_id = response.request_id, "dropping late reply");
                        None
                    }
                }
                Ok(Event::Malformed(request_id)) => Some(self.error_frame(request_id, FRAME_FAILED)),
                Ok(Event::Closed) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
                Err(RecvTimeoutError::Timeout) => None,
            };

            if let Some(response) = reply {
                if let Err(err) = writer.write_response(&response) {
                    break Err(err.into());
                }
            }
            if let Err(err) = self.expire(&mut pending, &mut writer) {
                break Err(err);
            }
        };

        let _ = writer.get_ref().shutdown();
        if reader_thread.join().is_err() {
            warn!("reader thread panicked");
        }
        if !pending.is_empty() {
            debug!(abandoned = pending.len(), "connection closed with requests in flight");
        }
        debug!(kind, "connection closed");
        outcome
    }

    /// Queue a request on the pool. Returns an immediate reply only when
    /// the pool cannot take it.
    fn dispatch(
        &self,
        request: RequestFrame,
        events: &Sender<Event>,
        pending: &mut HashMap<u32, Instant>,
    ) -> Option<ResponseFrame> {
        let request_id = request.request_id;
        debug!(request_id, action = %request.action, "request received");
        if pending.contains_key(&request_id) {
            // A second reply under this id could not be told apart.
            warn!(request_id, "request id is already in flight");
            return Some(self.error_frame(request_id, FRAME_FAILED));
        }
        pending.insert(request_id, Instant::now() + self.timeout);

        let processor = self.processor.clone();
        let events = events.clone();
        let queued = self.pool.execute(move || {
            let response = processor.process_frame(&request);
            // The connection may be gone; the reply is simply dropped.
            let _ = events.send(Event::Completed(response));
        });
        if queued {
            return None;
        }

        error!(request_id, "worker pool is not accepting jobs");
        pending.remove(&request_id);
        Some(self.error_frame(request_id, FRAME_FAILED))
    }

    fn expire(
        &self,
        pending: &mut HashMap<u32, Instant>,
        writer: &mut FrameWriter<IpcStream>,
    ) -> Result<()> {
        let now = Instant::now();
        let expired: Vec<u32> = pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(request_id, _)| *request_id)
            .collect();

        for request_id in expired {
            pending.remove(&request_id);
            let timeout_ms = self.timeout.as_millis();
            warn!(request_id, timeout_ms = timeout_ms as u64, "request timed out");
            let message = format!("SDK execution timed out after {timeout_ms}ms");
            writer.write_response(&self.error_frame(request_id, &message))?;
        }
        Ok(())
    }

    fn error_frame(&self, request_id: u32, message: &str) -> ResponseFrame {
        let names = self.processor.context().field_names();
        Reply::error(names, message).into_frame(request_id, names)
    }
}

fn read_requests(mut reader: FrameReader<IpcStream>, events: &Sender<Event>) {
    loop {
        let event = match reader.read_request() {
            Ok(request) => Event::Request(request),
            Err(FrameError::MalformedParts { request_id, reason }) => {
                warn!(request_id, %reason, "malformed request frame");
                Event::Malformed(request_id)
            }
            Err(FrameError::ConnectionClosed) => Event::Closed,
            Err(err) => {
                // Framing is lost; nothing more can be read reliably.
                warn!(error = %err, "failed to read frame");
                Event::Closed
            }
        };

        let closed = matches!(event, Event::Closed);
        if events.send(event).is_err() || closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use katana_frame::Frame;
    use katana_payload::{codec, FieldNames, PathDocument, Value};
    use katana_transport::connect;

    use super::*;
    use crate::component::Component;
    use crate::context::{ComponentInfo, Context};

    fn dispatcher(component: Component, config: DispatcherConfig) -> Dispatcher {
        let context = Context::new(
            Arc::new(component),
            ComponentInfo::new("users", "1.0", "3.0.0"),
            config.clone(),
        );
        let endpoint = Endpoint::Tcp("127.0.0.1:0".to_string());
        Dispatcher::bind(&endpoint, Processor::new(Arc::new(context)), config)
            .expect("dispatcher should bind")
    }

    fn client(stream: UnixStream) -> (FrameReader<IpcStream>, FrameWriter<IpcStream>) {
        let stream = IpcStream::from_unix(stream);
        let config = FrameConfig {
            read_timeout: Some(Duration::from_secs(5)),
            ..FrameConfig::default()
        };
        let reader = FrameReader::with_config_ipc(
            stream.try_clone().expect("stream should clone"),
            config.clone(),
        )
        .expect("reader should be created");
        let writer = FrameWriter::with_config_ipc(stream, config).expect("writer should be created");
        (reader, writer)
    }

    fn error_message(response: &ResponseFrame) -> String {
        let doc = codec::unpack_document(&response.result, Some(FieldNames::compact()))
            .expect("reply should decode");
        doc.get("command_reply/result/error/message")
            .and_then(Value::as_str)
            .expect("reply should be an error")
            .to_string()
    }

    #[test]
    fn malformed_frame_gets_an_error_reply() {
        let dispatcher = dispatcher(
            Component::service().action("read", |_| Ok(())),
            DispatcherConfig::default().with_workers(1),
        );
        let (server, client_stream) = UnixStream::pair().expect("pair should be created");
        let (mut reader, mut writer) = client(client_stream);

        let serving = thread::spawn(move || {
            dispatcher
                .serve_stream(IpcStream::from_unix(server))
                .expect("connection should end cleanly");
        });

        // A request frame needs three parts.
        writer
            .write_frame(&Frame::new(4, vec!["read".into()]))
            .expect("frame should be written");
        let response = reader.read_response().expect("reply should arrive");
        assert_eq!(response.request_id, 4);
        assert!(response.meta.is_empty());
        assert_eq!(error_message(&response), FRAME_FAILED);

        writer.get_ref().shutdown().expect("client should shut down");
        serving.join().expect("server thread should finish");
    }

    #[test]
    fn stop_handle_ends_run() {
        let dispatcher = dispatcher(
            Component::service().action("read", |_| Ok(())),
            DispatcherConfig::default().with_workers(1),
        );
        let stop = dispatcher.stop_handle();
        assert!(stop.is_running());

        let running = thread::spawn(move || dispatcher.run());
        thread::sleep(Duration::from_millis(50));
        stop.stop();

        running
            .join()
            .expect("dispatcher thread should finish")
            .expect("run should return cleanly");
        assert!(!stop.is_running());
    }

    #[test]
    fn serves_over_tcp() {
        let dispatcher = dispatcher(
            Component::service().action("read", |action| {
                action.set_return(true);
                Ok(())
            }),
            DispatcherConfig::default().with_workers(2),
        );
        let endpoint = dispatcher.endpoint();
        let stop = dispatcher.stop_handle();
        let running = thread::spawn(move || dispatcher.run());

        let stream = connect(&endpoint).expect("client should connect");
        let mut reader = FrameReader::with_config_ipc(
            stream.try_clone().expect("stream should clone"),
            FrameConfig {
                read_timeout: Some(Duration::from_secs(5)),
                ..FrameConfig::default()
            },
        )
        .expect("reader should be created");
        let mut writer =
            FrameWriter::with_config_ipc(stream, FrameConfig::default()).expect("writer should be created");

        let mut command = PathDocument::with_names(FieldNames::compact());
        command.set("command/name", "users").expect("command should be writable");
        command
            .set("command/arguments/transport/meta/id", "abc")
            .expect("command should be writable");
        let command = codec::pack_document(&command).expect("command should encode");
        writer
            .write_request(&RequestFrame::new(11, "read", command))
            .expect("request should be written");

        let response = reader.read_response().expect("reply should arrive");
        assert_eq!(response.request_id, 11);
        let doc = codec::unpack_document(&response.result, Some(FieldNames::compact()))
            .expect("reply should decode");
        assert_eq!(
            doc.get(
                katana_payload::Path::default()
                    .key("command_reply")
                    .key("result")
                    .raw("return")
            ),
            Some(&Value::from(true))
        );

        stop.stop();
        running
            .join()
            .expect("dispatcher thread should finish")
            .expect("run should return cleanly");
    }
}
