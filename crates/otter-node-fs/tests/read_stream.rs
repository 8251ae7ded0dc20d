//! Read stream behaviour against a scripted engine and the memory engine.
//!
//! The scripted engine lets a test hold `open` until released, push chunks by
//! hand, and inspect every pause/resume the stream issued.

use bytes::Bytes;
use otter_node_fs::{
    ChunkSink, EngineFile, FileHandle, FsConfig, FsEngine, FsError, MemoryEngine, NodeFs,
    ReadStream, ReadStreamOptions, StreamEvent, StreamState,
};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Script {
    hold_open: AtomicBool,
    released: Mutex<bool>,
    released_cv: Condvar,
    fail_close: AtomicBool,
    opens: AtomicUsize,
    closes: AtomicUsize,
    flow: Mutex<Vec<&'static str>>,
    sink: Mutex<Option<ChunkSink>>,
    subscribed_from: Mutex<Option<u64>>,
}

struct ScriptedEngine {
    script: Arc<Script>,
}

impl ScriptedEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Script::default()),
        })
    }

    /// `open` blocks until [`release_open`](Self::release_open).
    fn holding_open() -> Arc<Self> {
        let engine = Self::new();
        engine.script.hold_open.store(true, Ordering::SeqCst);
        engine
    }

    fn release_open(&self) {
        *self.script.released.lock() = true;
        self.script.released_cv.notify_all();
    }

    fn opens(&self) -> usize {
        self.script.opens.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.script.closes.load(Ordering::SeqCst)
    }

    fn flow(&self) -> Vec<&'static str> {
        self.script.flow.lock().clone()
    }

    fn last_flow(&self) -> Option<&'static str> {
        self.script.flow.lock().last().copied()
    }

    fn subscribed(&self) -> bool {
        self.script.sink.lock().is_some()
    }

    fn push(&self, chunk: &'static str) {
        let sink = self.script.sink.lock();
        let sink = sink.as_ref().expect("stream not subscribed");
        sink.data(Bytes::from_static(chunk.as_bytes()));
    }

    fn finish(&self) {
        if let Some(sink) = self.script.sink.lock().as_ref() {
            sink.end();
        }
    }

    fn fail(&self, detail: &str) {
        if let Some(sink) = self.script.sink.lock().as_ref() {
            sink.error(io::Error::other(detail.to_string()));
        }
    }
}

impl FsEngine for ScriptedEngine {
    fn open(
        &self,
        path: &str,
        _perms: &str,
        read: bool,
        _write: bool,
        _create: bool,
    ) -> io::Result<FileHandle> {
        self.script.opens.fetch_add(1, Ordering::SeqCst);
        if self.script.hold_open.load(Ordering::SeqCst) {
            let mut released = self.script.released.lock();
            while !*released {
                self.script.released_cv.wait(&mut released);
            }
        }
        if path == "/missing" {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        assert!(read, "read streams open for reading");
        Ok(Arc::new(ScriptedFile {
            script: self.script.clone(),
        }))
    }

    fn close(&self, _file: FileHandle) -> io::Result<()> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("device busy"));
        }
        Ok(())
    }
}

struct ScriptedFile {
    script: Arc<Script>,
}

impl fmt::Debug for ScriptedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScriptedFile")
    }
}

impl EngineFile for ScriptedFile {
    fn id(&self) -> u64 {
        1
    }

    fn read(&self, _position: u64, _len: usize) -> io::Result<Bytes> {
        Ok(Bytes::new())
    }

    fn subscribe(&self, from: u64, sink: ChunkSink) {
        *self.script.subscribed_from.lock() = Some(from);
        *self.script.sink.lock() = Some(sink);
    }

    fn pause(&self) {
        self.script.flow.lock().push("pause");
    }

    fn resume(&self) {
        self.script.flow.lock().push("resume");
    }
}

fn scripted_fs(engine: &Arc<ScriptedEngine>) -> NodeFs {
    NodeFs::new(engine.clone())
}

async fn next_event(stream: &mut ReadStream) -> StreamEvent {
    tokio::time::timeout(WAIT, stream.next_event())
        .await
        .expect("timed out waiting for a stream event")
        .expect("stream event channel closed")
}

/// Collect events until the channel closes after `Close`.
async fn drain(stream: &mut ReadStream) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(WAIT, stream.next_event())
        .await
        .expect("timed out draining stream events")
    {
        events.push(event);
    }
    events
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn data(event: &StreamEvent) -> Option<&Bytes> {
    match event {
        StreamEvent::Data(chunk) => Some(chunk),
        _ => None,
    }
}

fn count_close(events: &[StreamEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Close(_)))
        .count()
}

mod construction {
    use super::*;

    #[tokio::test]
    async fn start_after_end_fails_before_any_engine_call() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);

        let err = fs
            .create_read_stream("/f", ReadStreamOptions::default().range(10, Some(5)))
            .unwrap_err();
        assert!(matches!(err, FsError::InvalidArgument(_)));
        assert_eq!(engine.opens(), 0);
    }

    #[tokio::test]
    async fn non_numeric_start_from_json_fails() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);

        let err = fs
            .create_read_stream_json("/f", &serde_json::json!({"start": "ten"}))
            .unwrap_err();
        assert_eq!(err.code(), "EINVAL");
        assert_eq!(engine.opens(), 0);
    }

    #[tokio::test]
    async fn stream_opens_through_opening_state() {
        let engine = ScriptedEngine::holding_open();
        let fs = scripted_fs(&engine);

        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert_eq!(stream.state(), StreamState::Opening);
        assert_eq!(stream.path(), "/f");

        stream.read();
        eventually("open to be requested", || engine.opens() == 1).await;
        tokio::task::yield_now().await;
        assert!(stream.poll_events().is_empty());

        engine.release_open();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));
        assert_eq!(stream.state(), StreamState::Open);
        assert!(engine.subscribed());
        assert_eq!(engine.flow().first(), Some(&"pause"));
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn no_data_after_end() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        stream.resume();
        engine.push("abc");
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "abc");

        engine.finish();
        engine.push("late");
        let events = drain(&mut stream).await;
        assert!(matches!(events[0], StreamEvent::End));
        assert!(events.iter().all(|e| data(e).is_none()));
        assert_eq!(count_close(&events), 1);
        assert_eq!(stream.state(), StreamState::Closed);
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn end_waits_for_demand() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().auto_close(false))
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        stream.read();
        eventually("engine resume", || engine.last_flow() == Some("resume")).await;
        engine.push("one");
        engine.push("two");
        engine.finish();
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "one");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stream.poll_events().is_empty());

        assert_eq!(stream.read_chunk().await.unwrap().unwrap(), "two");
        assert_eq!(stream.read_chunk().await.unwrap(), None);
        assert_eq!(stream.state(), StreamState::Ended);
    }

    #[tokio::test]
    async fn double_close_emits_one_close() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().auto_close(false))
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        let (first, second) = tokio::join!(stream.close(), stream.close());
        first.unwrap();
        second.unwrap();
        stream.close().await.unwrap();
        stream.destroy();

        let events = drain(&mut stream).await;
        assert_eq!(count_close(&events), 1);
        assert_eq!(engine.closes(), 1);
        assert_eq!(stream.state(), StreamState::Closed);
    }

    #[tokio::test]
    async fn close_before_open_closes_once_after_open() {
        let engine = ScriptedEngine::holding_open();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();

        let (closed, ()) = tokio::join!(stream.close(), async {
            eventually("open to be requested", || engine.opens() == 1).await;
            assert_eq!(engine.closes(), 0);
            engine.release_open();
        });
        closed.unwrap();

        let events = drain(&mut stream).await;
        assert!(matches!(events[0], StreamEvent::Open));
        assert_eq!(count_close(&events), 1);
        assert!(matches!(events.last(), Some(StreamEvent::Close(None))));
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn open_failure_emits_error_then_close() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/missing", ReadStreamOptions::default())
            .unwrap();

        let events = drain(&mut stream).await;
        assert_eq!(events.len(), 2);
        match &events[0] {
            StreamEvent::Error(e) => assert_eq!(e.code(), "ENOENT"),
            other => panic!("expected error, got {other:?}"),
        }
        assert!(matches!(events[1], StreamEvent::Close(None)));
        assert_eq!(stream.state(), StreamState::Errored);
        assert_eq!(engine.closes(), 0);
    }

    #[tokio::test]
    async fn open_failure_without_auto_close_waits_for_close() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/missing", ReadStreamOptions::default().auto_close(false))
            .unwrap();

        assert!(matches!(next_event(&mut stream).await, StreamEvent::Error(_)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(stream.poll_events().is_empty());

        stream.close().await.unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Close(None)));
    }

    #[tokio::test]
    async fn source_error_tears_down() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        stream.resume();
        engine.fail("disk on fire");
        let events = drain(&mut stream).await;
        match &events[0] {
            StreamEvent::Error(e) => {
                assert_eq!(e.code(), "EIO");
                assert!(e.to_string().contains("disk on fire"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(count_close(&events), 1);
        assert_eq!(stream.state(), StreamState::Errored);
        assert_eq!(engine.closes(), 1);
    }

    #[tokio::test]
    async fn failed_release_reports_error_and_still_closes() {
        let engine = ScriptedEngine::new();
        engine.script.fail_close.store(true, Ordering::SeqCst);
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        let err = stream.close().await.unwrap_err();
        assert!(err.to_string().contains("device busy"));
        // Repeated closes report the same outcome.
        assert!(stream.close().await.is_err());

        let events = drain(&mut stream).await;
        assert!(matches!(events[0], StreamEvent::Error(_)));
        assert!(matches!(events[1], StreamEvent::Close(Some(_))));
        assert_eq!(events.len(), 2);
    }
}

mod backpressure {
    use super::*;

    #[tokio::test]
    async fn engine_paused_at_high_water_mark_and_resumed_on_pull() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().high_water_mark(4))
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));
        assert_eq!(engine.flow(), vec!["pause"]);

        stream.read();
        eventually("engine resume", || engine.last_flow() == Some("resume")).await;

        engine.push("ab");
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "ab");

        engine.push("cd");
        engine.push("ef");
        eventually("engine pause", || engine.last_flow() == Some("pause")).await;
        assert_eq!(engine.flow(), vec!["pause", "resume", "pause"]);

        stream.read();
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "cd");
        eventually("engine resume", || engine.last_flow() == Some("resume")).await;
    }

    #[tokio::test]
    async fn engine_stays_paused_until_first_pull() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.flow(), vec!["pause"]);
    }

    #[tokio::test]
    async fn pause_and_resume_neither_drop_nor_duplicate() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        stream.resume();
        engine.push("1");
        engine.push("2");
        let mut seen = vec![data(&next_event(&mut stream).await).unwrap().clone()];

        stream.pause();
        engine.push("3");
        engine.push("4");
        stream.resume();
        stream.pause();
        engine.push("5");
        stream.resume();
        engine.finish();

        loop {
            match next_event(&mut stream).await {
                StreamEvent::Data(chunk) => seen.push(chunk),
                StreamEvent::End => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        let joined: Vec<u8> = seen.iter().flat_map(|c| c.iter().copied()).collect();
        assert_eq!(joined, b"12345");
    }

    #[tokio::test]
    async fn memory_engine_pause_resume_delivers_everything_once() {
        let engine = Arc::new(MemoryEngine::with_chunk_size(7));
        let contents: Vec<u8> = (0..=255u8).collect();
        engine.insert_file("/bytes.bin", contents.clone()).unwrap();
        let fs = NodeFs::new(engine.clone());

        let mut stream = fs
            .create_read_stream("/bytes.bin", ReadStreamOptions::default().high_water_mark(16))
            .unwrap();
        let mut collected = Vec::new();
        let mut toggles = 0;
        stream.resume();
        loop {
            match next_event(&mut stream).await {
                StreamEvent::Open => {}
                StreamEvent::Data(chunk) => {
                    collected.extend_from_slice(&chunk);
                    toggles += 1;
                    if toggles % 3 == 0 {
                        stream.pause();
                        tokio::task::yield_now().await;
                        stream.resume();
                    }
                }
                StreamEvent::End => break,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(collected, contents);
        eventually("handle release", || engine.open_count() == 0).await;
    }

    #[tokio::test]
    async fn zero_high_water_mark_pulls_one_chunk_per_read() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().high_water_mark(0))
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));

        stream.read();
        eventually("engine resume", || engine.last_flow() == Some("resume")).await;
        engine.push("ab");
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "ab");
        eventually("engine pause", || engine.last_flow() == Some("pause")).await;

        stream.read();
        eventually("engine resume", || engine.last_flow() == Some("resume")).await;
        engine.push("cd");
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "cd");
        eventually("engine pause", || engine.flow().len() == 5).await;
        assert_eq!(
            engine.flow(),
            vec!["pause", "resume", "pause", "resume", "pause"]
        );
    }

    #[tokio::test]
    async fn zero_high_water_mark_reads_to_end() {
        let engine = Arc::new(MemoryEngine::with_chunk_size(4));
        engine.insert_file("/f", "hello world").unwrap();
        let fs = NodeFs::new(engine.clone());

        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().high_water_mark(0))
            .unwrap();
        let contents = tokio::time::timeout(WAIT, stream.read_to_end())
            .await
            .expect("read stalled")
            .unwrap();
        assert_eq!(contents, "hello world");
    }
}

mod ranges {
    use super::*;

    fn memory_fs(chunk_size: usize) -> (NodeFs, Arc<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::with_chunk_size(chunk_size));
        engine.insert_file("/hex.txt", "0123456789abcdef").unwrap();
        (NodeFs::new(engine.clone()), engine)
    }

    #[tokio::test]
    async fn inclusive_range() {
        let (fs, engine) = memory_fs(4);
        let mut stream = fs
            .create_read_stream("/hex.txt", ReadStreamOptions::default().range(3, Some(9)))
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), "3456789");
        eventually("handle release", || engine.open_count() == 0).await;
    }

    #[tokio::test]
    async fn open_ended_range() {
        let (fs, _) = memory_fs(5);
        let mut stream = fs
            .create_read_stream("/hex.txt", ReadStreamOptions::default().range(12, None))
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), "cdef");
    }

    #[tokio::test]
    async fn single_byte_range() {
        let (fs, _) = memory_fs(3);
        let mut stream = fs
            .create_read_stream_json("/hex.txt", &serde_json::json!({"start": 0, "end": 0}))
            .unwrap();
        assert_eq!(stream.read_to_end().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn range_start_is_passed_to_the_engine() {
        let engine = ScriptedEngine::new();
        let fs = scripted_fs(&engine);
        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default().range(5, Some(7)))
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));
        assert_eq!(*engine.script.subscribed_from.lock(), Some(5));

        stream.resume();
        engine.push("567890");
        assert_eq!(data(&next_event(&mut stream).await).unwrap(), "567");
        assert!(matches!(next_event(&mut stream).await, StreamEvent::End));
    }
}

mod descriptors {
    use super::*;

    #[tokio::test]
    async fn stream_over_open_descriptor() {
        let engine = Arc::new(MemoryEngine::new());
        engine.insert_file("/log.txt", "line one\nline two\n").unwrap();
        let fs = NodeFs::new(engine.clone());

        let fd = fs.open("/log.txt", "r", None).await.unwrap();
        let mut stream = fs
            .create_read_stream("/log.txt", ReadStreamOptions::default().fd(fd))
            .unwrap();
        assert_eq!(stream.state(), StreamState::Open);
        assert_eq!(fs.open_descriptors(), 0);

        // No `Open` for a pre-supplied handle.
        let mut events = Vec::new();
        stream.resume();
        events.extend(drain(&mut stream).await);
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::Open)));
        let text: Vec<u8> = events
            .iter()
            .filter_map(data)
            .flat_map(|c| c.iter().copied())
            .collect();
        assert_eq!(text, b"line one\nline two\n");
        assert_eq!(engine.open_count(), 0);

        assert_eq!(fs.close(fd).await.unwrap_err().code(), "EBADF");
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_handle() {
        let engine = Arc::new(MemoryEngine::new());
        engine.insert_file("/f", "contents").unwrap();
        let fs = NodeFs::new(engine.clone());

        let mut stream = fs
            .create_read_stream("/f", ReadStreamOptions::default())
            .unwrap();
        assert!(matches!(next_event(&mut stream).await, StreamEvent::Open));
        assert_eq!(engine.open_count(), 1);

        drop(stream);
        eventually("handle release", || engine.open_count() == 0).await;
    }

    #[tokio::test]
    async fn config_defaults_flow_into_streams() {
        let config = FsConfig::from_toml_str("high_water_mark = 8\nauto_close = false\n").unwrap();
        let fs = NodeFs::in_memory(config);
        let options = fs.read_stream_options();
        assert_eq!(options.high_water_mark, 8);
        assert!(!options.auto_close);

        let options = ReadStreamOptions::from_json(&serde_json::json!({}), fs.config()).unwrap();
        assert_eq!(options.high_water_mark, 8);
    }
}
