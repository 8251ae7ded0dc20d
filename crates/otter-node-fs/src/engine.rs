//! The filesystem engine capability.
//!
//! Every real operation is delegated to an [`FsEngine`]. Methods are blocking;
//! the facade runs them on the blocking pool for its async variants. Only
//! `open` and `close` are required, the rest default to `Unsupported` so an
//! engine can implement the subset it has.

use bytes::Bytes;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared reference to an open engine file.
pub type FileHandle = Arc<dyn EngineFile>;

/// File properties reported by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub size: u64,
    pub atime_ms: u64,
    pub mtime_ms: u64,
    pub ctime_ms: u64,
    pub is_file: bool,
    pub is_directory: bool,
    pub is_symlink: bool,
}

impl Stats {
    pub fn is_file(&self) -> bool {
        self.is_file
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn is_symbolic_link(&self) -> bool {
        self.is_symlink
    }
}

/// Event delivered by an engine file after [`EngineFile::subscribe`].
#[derive(Debug)]
pub enum SourceEvent {
    /// Data available.
    Data(Bytes),
    /// No more data will arrive.
    End,
    /// Reading failed; no more events follow.
    Error(io::Error),
}

/// Where an engine file delivers its data events.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl ChunkSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SourceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Deliver a chunk. Returns false once nobody is listening.
    pub fn data(&self, chunk: Bytes) -> bool {
        self.tx.send(SourceEvent::Data(chunk)).is_ok()
    }

    /// Signal end of data.
    pub fn end(&self) -> bool {
        self.tx.send(SourceEvent::End).is_ok()
    }

    pub fn error(&self, err: io::Error) -> bool {
        self.tx.send(SourceEvent::Error(err)).is_ok()
    }

    /// True once the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// An open file inside the engine.
pub trait EngineFile: Send + Sync + fmt::Debug {
    /// Engine-assigned identity of this handle.
    fn id(&self) -> u64;

    /// Read up to `len` bytes at `position`. A short result means end of file.
    fn read(&self, position: u64, len: usize) -> io::Result<Bytes>;

    fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        let _ = len;
        Err(unsupported("truncate"))
    }

    /// Start delivering the file's contents from byte `from` into `sink`.
    ///
    /// Delivery starts flowing immediately and continues until `End`,
    /// `Error`, or close, honouring [`pause`](Self::pause) and
    /// [`resume`](Self::resume).
    fn subscribe(&self, from: u64, sink: ChunkSink);

    /// Stop delivering data events until [`resume`](Self::resume).
    fn pause(&self);

    fn resume(&self);
}

/// The external filesystem implementation.
pub trait FsEngine: Send + Sync {
    /// Open `path` with an `rwx` permission string used when creating.
    fn open(
        &self,
        path: &str,
        perms: &str,
        read: bool,
        write: bool,
        create: bool,
    ) -> io::Result<FileHandle>;

    /// Release an open file.
    fn close(&self, file: FileHandle) -> io::Result<()>;

    /// Properties, following symlinks.
    fn props(&self, path: &str) -> io::Result<Stats> {
        let _ = path;
        Err(unsupported("props"))
    }

    /// Properties of the link itself.
    fn lprops(&self, path: &str) -> io::Result<Stats> {
        self.props(path)
    }

    fn exists(&self, path: &str) -> io::Result<bool> {
        match self.lprops(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read_file(&self, path: &str) -> io::Result<Bytes> {
        let _ = path;
        Err(unsupported("read_file"))
    }

    fn write_file(&self, path: &str, data: Bytes) -> io::Result<()> {
        let _ = (path, data);
        Err(unsupported("write_file"))
    }

    /// Entry names (not full paths) of a directory.
    fn read_dir(&self, path: &str) -> io::Result<Vec<String>> {
        let _ = path;
        Err(unsupported("read_dir"))
    }

    fn mkdir(&self, path: &str, perms: &str, create_parents: bool) -> io::Result<()> {
        let _ = (path, perms, create_parents);
        Err(unsupported("mkdir"))
    }

    /// Remove an empty directory.
    fn delete(&self, path: &str) -> io::Result<()> {
        let _ = path;
        Err(unsupported("delete"))
    }

    /// Remove a file or symlink.
    fn unlink(&self, path: &str) -> io::Result<()> {
        let _ = path;
        Err(unsupported("unlink"))
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let _ = (from, to);
        Err(unsupported("rename"))
    }

    fn chmod(&self, path: &str, perms: &str) -> io::Result<()> {
        let _ = (path, perms);
        Err(unsupported("chmod"))
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> io::Result<()> {
        let _ = (path, uid, gid);
        Err(unsupported("chown"))
    }

    fn truncate(&self, path: &str, len: u64) -> io::Result<()> {
        let _ = (path, len);
        Err(unsupported("truncate"))
    }

    /// Create `link` pointing at `existing`.
    fn symlink(&self, link: &str, existing: &str) -> io::Result<()> {
        let _ = (link, existing);
        Err(unsupported("symlink"))
    }

    fn read_symlink(&self, link: &str) -> io::Result<String> {
        let _ = link;
        Err(unsupported("read_symlink"))
    }
}

fn unsupported(op: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{op} is not supported by this engine"),
    )
}
