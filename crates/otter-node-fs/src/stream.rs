//! Readable file streams (`fs.createReadStream`).
//!
//! A [`ReadStream`] is the caller-side half. It sends commands (pull, pause,
//! resume, close) to a driver task which exclusively owns the engine handle,
//! buffers the engine's data events, and forwards chunks as consumer demand
//! allows. Events are observed through [`ReadStream::next_event`].
//!
//! # Example
//!
//! ```no_run
//! # async fn demo(fs: otter_node_fs::NodeFs) -> otter_node_fs::FsResult<()> {
//! use otter_node_fs::ReadStreamOptions;
//!
//! let mut stream = fs.create_read_stream("/var/log/app.log", ReadStreamOptions::default())?;
//! while let Some(chunk) = stream.read_chunk().await? {
//!     println!("{} bytes", chunk.len());
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::FsConfig;
use crate::engine::{ChunkSink, FileHandle, FsEngine, SourceEvent};
use crate::error::{FsError, FsResult, HandleError};
use crate::flags::OpenFlags;
use crate::fs::Fd;
use crate::mode::{ModeTable, mode_from_json};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Default buffering threshold: 64 KiB.
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// Lifecycle of a read stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Constructed, no open requested yet.
    Unopened,
    /// Waiting for the engine to open the path.
    Opening,
    /// Handle acquired.
    Open,
    /// `End` delivered to the consumer.
    Ended,
    /// Handle released.
    Closed,
    /// Open or read failed.
    Errored,
}

/// Notification delivered to the stream consumer.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The engine opened the file. Not emitted for pre-supplied descriptors.
    Open,
    Data(Bytes),
    /// No more data.
    End,
    Error(FsError),
    /// Terminal notification; carries the release error if closing failed.
    Close(Option<FsError>),
}

/// Options for [`NodeFs::create_read_stream`](crate::NodeFs::create_read_stream).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadStreamOptions {
    /// Read from an already open descriptor instead of opening `path`.
    pub fd: Option<Fd>,
    pub flags: String,
    pub mode: u32,
    /// First byte to deliver.
    pub start: Option<u64>,
    /// Last byte to deliver (inclusive). `None` reads to the end.
    pub end: Option<u64>,
    pub auto_close: bool,
    pub high_water_mark: usize,
}

impl Default for ReadStreamOptions {
    fn default() -> Self {
        Self::from_config(&FsConfig::default())
    }
}

impl ReadStreamOptions {
    /// Defaults taken from a config.
    pub fn from_config(config: &FsConfig) -> Self {
        Self {
            fd: None,
            flags: "r".to_string(),
            mode: config.default_file_mode,
            start: None,
            end: None,
            auto_close: config.auto_close,
            high_water_mark: config.high_water_mark,
        }
    }

    pub fn range(mut self, start: u64, end: Option<u64>) -> Self {
        self.start = Some(start);
        self.end = end;
        self
    }

    pub fn fd(mut self, fd: Fd) -> Self {
        self.fd = Some(fd);
        self
    }

    pub fn high_water_mark(mut self, high_water_mark: usize) -> Self {
        self.high_water_mark = high_water_mark;
        self
    }

    pub fn auto_close(mut self, auto_close: bool) -> Self {
        self.auto_close = auto_close;
        self
    }

    /// Parse `{fd, flags, mode, start, end, autoClose, highWaterMark}`.
    ///
    /// Unknown keys are ignored. `null`/missing values take defaults.
    pub fn from_json(value: &Value, config: &FsConfig) -> FsResult<Self> {
        let mut options = Self::from_config(config);
        let obj = match value {
            Value::Null => return Ok(options),
            Value::Object(obj) => obj,
            other => {
                return Err(FsError::invalid(format!(
                    "stream options must be an object, got {other}"
                )));
            }
        };

        let present = |key: &str| obj.get(key).filter(|v| !v.is_null());

        if let Some(fd) = present("fd") {
            let fd = fd
                .as_u64()
                .ok_or_else(|| FsError::invalid("fd must be a non-negative integer"))?;
            options.fd = Some(Fd::from_raw(fd));
        }
        if let Some(flags) = present("flags") {
            options.flags = flags
                .as_str()
                .ok_or_else(|| FsError::invalid("flags must be a string"))?
                .to_string();
        }
        if let Some(mode) = present("mode") {
            if let Some(mode) = mode_from_json(mode)? {
                options.mode = mode;
            }
        }
        if let Some(start) = present("start") {
            options.start = Some(position_from_json(start, "start")?);
        }
        if let Some(end) = present("end") {
            options.end = Some(position_from_json(end, "end")?);
        }
        if let Some(auto_close) = present("autoClose") {
            options.auto_close = auto_close
                .as_bool()
                .ok_or_else(|| FsError::invalid("autoClose must be a boolean"))?;
        }
        if let Some(hwm) = present("highWaterMark") {
            options.high_water_mark = hwm
                .as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| FsError::invalid("highWaterMark must be a non-negative integer"))?;
        }

        options.validate()?;
        Ok(options)
    }

    /// Range check. An unset `end` is unbounded.
    pub fn validate(&self) -> FsResult<()> {
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(FsError::invalid(format!(
                "start ({start}) must be <= end ({end})"
            )));
        }
        Ok(())
    }
}

fn position_from_json(value: &Value, name: &str) -> FsResult<u64> {
    if let Some(position) = value.as_u64() {
        return Ok(position);
    }
    match value.as_f64() {
        Some(float) if float >= 0.0 && float.fract() == 0.0 && float <= u64::MAX as f64 => {
            Ok(float as u64)
        }
        _ => Err(FsError::invalid(format!(
            "{name} must be a non-negative integer, got {value}"
        ))),
    }
}

enum StreamCommand {
    /// Pull one chunk.
    Read,
    Pause,
    Resume,
    Close(Option<oneshot::Sender<FsResult<()>>>),
}

/// Caller-side handle of a readable file stream.
///
/// Dropping it releases the engine handle if the stream still holds one.
pub struct ReadStream {
    path: String,
    state: Arc<Mutex<StreamState>>,
    command_tx: mpsc::UnboundedSender<StreamCommand>,
    event_rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ReadStream {
    /// Validate options and start the driver task.
    ///
    /// With `file` the stream starts `Open`; otherwise it starts `Opening`
    /// and asks the engine to open `path`. Must be called within a tokio
    /// runtime.
    pub(crate) fn spawn(
        engine: Arc<dyn FsEngine>,
        modes: &ModeTable,
        path: String,
        options: ReadStreamOptions,
        file: Option<FileHandle>,
    ) -> FsResult<Self> {
        options.validate()?;
        let open = match file {
            Some(_) => None,
            None => Some(OpenRequest {
                flags: OpenFlags::from_token(&options.flags),
                perms: modes.permission_string(Some(options.mode))?.to_string(),
            }),
        };

        let state = Arc::new(Mutex::new(StreamState::Unopened));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let mut driver = Driver {
            path: path.clone(),
            engine,
            state: state.clone(),
            events: Some(event_tx),
            commands: command_rx,
            file: None,
            source: None,
            buffer: VecDeque::new(),
            buffered: 0,
            high_water_mark: options.high_water_mark,
            auto_close: options.auto_close,
            demand: 0,
            flowing: false,
            pulled: false,
            engine_paused: true,
            position: options.start.unwrap_or(0),
            end: options.end,
            source_done: false,
            end_emitted: false,
            close_requested: false,
            close_waiters: Vec::new(),
            close_result: None,
        };

        match file {
            Some(file) => {
                driver.set_state(StreamState::Open);
                driver.attach(file);
            }
            None => driver.set_state(StreamState::Opening),
        }
        debug!(path = %path, start = ?options.start, end = ?options.end, "read stream created");
        tokio::spawn(driver.run(open));

        Ok(Self {
            path,
            state,
            command_tx,
            event_rx,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Request one more chunk.
    pub fn read(&self) {
        let _ = self.command_tx.send(StreamCommand::Read);
    }

    /// Leave flowing mode. Buffered chunks stay buffered.
    pub fn pause(&self) {
        let _ = self.command_tx.send(StreamCommand::Pause);
    }

    /// Enter flowing mode: every chunk is delivered as it arrives.
    pub fn resume(&self) {
        let _ = self.command_tx.send(StreamCommand::Resume);
    }

    /// Close without waiting for the outcome.
    pub fn destroy(&self) {
        let _ = self.command_tx.send(StreamCommand::Close(None));
    }

    /// Close the stream and release its handle.
    ///
    /// Idempotent: every call resolves with the outcome of the one close, and
    /// a single [`StreamEvent::Close`] is emitted. Before the open completes
    /// the close is deferred until it does.
    pub async fn close(&self) -> FsResult<()> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(StreamCommand::Close(Some(tx)))
            .map_err(|_| HandleError::internal("close", "stream driver stopped"))?;
        rx.await
            .map_err(|_| HandleError::internal("close", "stream driver stopped"))?
    }

    /// Next notification. `None` after the terminal `Close`.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.event_rx.recv().await
    }

    /// Drain notifications already delivered, without waiting.
    pub fn poll_events(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Pull one chunk and wait for it. `Ok(None)` at end of data or close.
    pub async fn read_chunk(&mut self) -> FsResult<Option<Bytes>> {
        self.read();
        while let Some(event) = self.next_event().await {
            match event {
                StreamEvent::Open => continue,
                StreamEvent::Data(chunk) => return Ok(Some(chunk)),
                StreamEvent::End | StreamEvent::Close(None) => return Ok(None),
                StreamEvent::Error(e) | StreamEvent::Close(Some(e)) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Read every remaining chunk.
    pub async fn read_to_end(&mut self) -> FsResult<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

impl std::fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadStream")
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

struct OpenRequest {
    flags: OpenFlags,
    perms: String,
}

/// Owns the handle; processes one event or command at a time.
struct Driver {
    path: String,
    engine: Arc<dyn FsEngine>,
    state: Arc<Mutex<StreamState>>,
    /// Dropped after the terminal `Close`.
    events: Option<mpsc::UnboundedSender<StreamEvent>>,
    commands: mpsc::UnboundedReceiver<StreamCommand>,
    file: Option<FileHandle>,
    source: Option<mpsc::UnboundedReceiver<SourceEvent>>,
    buffer: VecDeque<Bytes>,
    buffered: usize,
    high_water_mark: usize,
    auto_close: bool,
    /// Chunks requested by `read()` and not yet delivered.
    demand: usize,
    flowing: bool,
    /// The engine stays paused until the first pull.
    pulled: bool,
    engine_paused: bool,
    /// Absolute offset of the next byte the engine will deliver.
    position: u64,
    end: Option<u64>,
    source_done: bool,
    end_emitted: bool,
    close_requested: bool,
    close_waiters: Vec<oneshot::Sender<FsResult<()>>>,
    close_result: Option<FsResult<()>>,
}

impl Driver {
    async fn run(mut self, open: Option<OpenRequest>) {
        if let Some(request) = open {
            let detached = self.open(request).await;
            if detached {
                self.close().await;
                return;
            }
        }

        loop {
            self.pump();
            if self.close_requested && self.close_result.is_none() {
                self.close().await;
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        if self.close_result.is_none() {
                            self.close().await;
                        }
                        return;
                    }
                },
                event = next_source(&mut self.source) => self.on_source(event),
            }
        }
    }

    /// Ask the engine to open the path, queueing commands meanwhile.
    /// Returns true if the caller went away during the open.
    async fn open(&mut self, request: OpenRequest) -> bool {
        let engine = self.engine.clone();
        let path = self.path.clone();
        let OpenRequest { flags, perms } = request;
        let mut task: JoinHandle<std::io::Result<FileHandle>> =
            tokio::task::spawn_blocking(move || {
                engine.open(&path, &perms, flags.read, flags.write, flags.create)
            });

        let mut detached = false;
        let joined = loop {
            if detached {
                break (&mut task).await;
            }
            tokio::select! {
                joined = &mut task => break joined,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => detached = true,
                },
            }
        };

        let result = match joined {
            Ok(Ok(file)) => Ok(file),
            Ok(Err(e)) => Err(FsError::from(HandleError::from_io("open", &self.path, e))),
            Err(e) => Err(FsError::from(HandleError::internal(
                "open",
                format!("open task failed: {e}"),
            ))),
        };

        match result {
            Ok(file) => {
                debug!(path = %self.path, id = file.id(), "read stream opened");
                if detached || self.close_requested {
                    self.file = Some(file);
                } else {
                    self.attach(file);
                }
                self.set_state(StreamState::Open);
                self.emit(StreamEvent::Open);
            }
            Err(e) => {
                debug!(path = %self.path, error = %e, "read stream open failed");
                self.set_state(StreamState::Errored);
                self.emit(StreamEvent::Error(e));
                if self.auto_close {
                    self.close_requested = true;
                }
            }
        }
        detached
    }

    /// Subscribe to the handle's data events, paused until the first pull.
    fn attach(&mut self, file: FileHandle) {
        let (sink, rx) = ChunkSink::channel();
        file.pause();
        file.subscribe(self.position, sink);
        self.engine_paused = true;
        self.source = Some(rx);
        self.file = Some(file);
    }

    fn apply(&mut self, command: StreamCommand) {
        match command {
            StreamCommand::Read => {
                self.demand += 1;
                self.pulled = true;
            }
            StreamCommand::Pause => self.flowing = false,
            StreamCommand::Resume => {
                self.flowing = true;
                self.pulled = true;
            }
            StreamCommand::Close(waiter) => {
                match (&self.close_result, waiter) {
                    (Some(result), Some(waiter)) => {
                        let _ = waiter.send(result.clone());
                    }
                    (None, Some(waiter)) => self.close_waiters.push(waiter),
                    (_, None) => {}
                }
                self.close_requested = true;
            }
        }
    }

    fn on_source(&mut self, event: Option<SourceEvent>) {
        match event {
            Some(SourceEvent::Data(chunk)) => self.on_data(chunk),
            Some(SourceEvent::End) | None => self.finish_source(),
            Some(SourceEvent::Error(e)) => {
                let err = FsError::from(HandleError::from_io("read", &self.path, e));
                debug!(path = %self.path, error = %err, "read stream failed");
                self.source = None;
                self.source_done = true;
                self.buffer.clear();
                self.buffered = 0;
                self.set_state(StreamState::Errored);
                self.emit(StreamEvent::Error(err));
                if self.auto_close {
                    self.close_requested = true;
                }
            }
        }
    }

    fn on_data(&mut self, mut chunk: Bytes) {
        if self.source_done {
            return;
        }
        let chunk_start = self.position;
        self.position += chunk.len() as u64;

        if let Some(end) = self.end {
            let keep = end
                .saturating_add(1)
                .saturating_sub(chunk_start)
                .min(chunk.len() as u64);
            chunk.truncate(keep as usize);
        }
        if !chunk.is_empty() {
            trace!(path = %self.path, len = chunk.len(), "buffered chunk");
            self.buffered += chunk.len();
            self.buffer.push_back(chunk);
        }
        if self.end.is_some_and(|end| self.position > end) {
            self.finish_source();
        }
    }

    /// No more data from the engine: it ended or the range is exhausted.
    fn finish_source(&mut self) {
        self.source_done = true;
        self.source = None;
        if let Some(file) = &self.file
            && !self.engine_paused
        {
            file.pause();
            self.engine_paused = true;
        }
    }

    /// Deliver what demand allows, then adjust engine flow.
    fn pump(&mut self) {
        if self.close_result.is_some() || self.state() == StreamState::Errored {
            return;
        }

        while self.flowing || self.demand > 0 {
            let Some(chunk) = self.buffer.pop_front() else {
                break;
            };
            self.buffered -= chunk.len();
            self.demand = self.demand.saturating_sub(1);
            self.emit(StreamEvent::Data(chunk));
        }

        if self.source_done
            && self.buffer.is_empty()
            && !self.end_emitted
            && (self.flowing || self.demand > 0)
        {
            self.demand = 0;
            self.end_emitted = true;
            self.set_state(StreamState::Ended);
            self.emit(StreamEvent::End);
            if self.auto_close {
                self.close_requested = true;
            }
            return;
        }

        if self.source_done {
            return;
        }
        if let Some(file) = &self.file {
            // An empty buffer with outstanding demand always pulls, so a zero
            // mark still makes progress one chunk at a time.
            let starved = (self.flowing || self.demand > 0) && self.buffer.is_empty();
            let wants_more =
                (self.pulled && self.buffered < self.high_water_mark) || starved;
            if wants_more && self.engine_paused {
                trace!(path = %self.path, "resuming engine");
                file.resume();
                self.engine_paused = false;
            } else if !wants_more && !self.engine_paused {
                trace!(path = %self.path, buffered = self.buffered, "pausing engine");
                file.pause();
                self.engine_paused = true;
            }
        }
    }

    /// Release the handle and emit the terminal notification. Runs once.
    async fn close(&mut self) {
        self.source = None;
        self.buffer.clear();
        self.buffered = 0;

        let result = match self.file.take() {
            Some(file) => {
                let engine = self.engine.clone();
                match tokio::task::spawn_blocking(move || engine.close(file)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(FsError::from(HandleError::from_io("close", &self.path, e))),
                    Err(e) => Err(FsError::from(HandleError::internal(
                        "close",
                        format!("close task failed: {e}"),
                    ))),
                }
            }
            None => Ok(()),
        };

        debug!(path = %self.path, ok = result.is_ok(), "read stream closed");
        if let Err(e) = &result {
            self.emit(StreamEvent::Error(e.clone()));
        }
        if self.state() != StreamState::Errored {
            self.set_state(StreamState::Closed);
        }
        self.emit(StreamEvent::Close(result.clone().err()));
        self.events = None;
        for waiter in self.close_waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
        self.close_result = Some(result);
    }

    fn state(&self) -> StreamState {
        *self.state.lock()
    }

    fn set_state(&self, next: StreamState) {
        let mut state = self.state.lock();
        if *state != next {
            trace!(path = %self.path, from = ?*state, to = ?next, "read stream state");
            *state = next;
        }
    }

    fn emit(&self, event: StreamEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Next engine event, or never if no source is attached.
async fn next_source(
    source: &mut Option<mpsc::UnboundedReceiver<SourceEvent>>,
) -> Option<SourceEvent> {
    match source {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
