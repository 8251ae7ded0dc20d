//! node:fs facade
//!
//! Node-shaped file system operations delegated to an [`FsEngine`]. Every
//! operation comes in an async form, which runs the engine call on the
//! blocking pool, and a `_sync` form, which calls the engine directly.
//! Open files are tracked in a descriptor table keyed by [`Fd`].

use crate::config::FsConfig;
use crate::encoding::Encoding;
use crate::engine::{FileHandle, FsEngine, Stats};
use crate::error::{FsError, FsResult, HandleError};
use crate::flags::OpenFlags;
use crate::memory::MemoryEngine;
use crate::mode::ModeTable;
use crate::stream::{ReadStream, ReadStreamOptions};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// File descriptor handed out by [`NodeFs::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fd(u64);

impl Fd {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of reading a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Decoded with the requested encoding.
    String(String),
    /// Raw contents.
    Bytes(Bytes),
}

impl ReadResult {
    pub fn into_bytes(self) -> Bytes {
        match self {
            ReadResult::String(s) => Bytes::from(s),
            ReadResult::Bytes(b) => b,
        }
    }
}

#[derive(Debug, Clone)]
struct OpenFile {
    file: FileHandle,
    path: String,
    /// Cursor for reads without an explicit position.
    position: u64,
}

/// Open descriptors.
#[derive(Debug)]
struct FdTable {
    next: AtomicU64,
    files: Mutex<HashMap<u64, OpenFile>>,
}

impl FdTable {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            files: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, file: FileHandle, path: String) -> Fd {
        let fd = self.next.fetch_add(1, Ordering::Relaxed);
        self.files.lock().insert(
            fd,
            OpenFile {
                file,
                path,
                position: 0,
            },
        );
        Fd(fd)
    }

    fn get(&self, syscall: &'static str, fd: Fd) -> FsResult<OpenFile> {
        self.files
            .lock()
            .get(&fd.0)
            .cloned()
            .ok_or_else(|| FsError::unknown_handle(syscall, Some(fd.0)))
    }

    fn take(&self, syscall: &'static str, fd: Fd) -> FsResult<OpenFile> {
        self.files
            .lock()
            .remove(&fd.0)
            .ok_or_else(|| FsError::unknown_handle(syscall, Some(fd.0)))
    }

    fn advance(&self, fd: Fd, by: u64) {
        if let Some(entry) = self.files.lock().get_mut(&fd.0) {
            entry.position += by;
        }
    }

    fn len(&self) -> usize {
        self.files.lock().len()
    }
}

struct Inner {
    engine: Arc<dyn FsEngine>,
    modes: ModeTable,
    fds: FdTable,
    config: FsConfig,
}

/// The `fs` module.
///
/// Cheap to clone; clones share the engine and descriptor table.
#[derive(Clone)]
pub struct NodeFs {
    inner: Arc<Inner>,
}

impl fmt::Debug for NodeFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFs")
            .field("config", &self.inner.config)
            .field("open_descriptors", &self.inner.fds.len())
            .finish()
    }
}

impl NodeFs {
    pub fn new(engine: Arc<dyn FsEngine>) -> Self {
        Self::with_config(engine, FsConfig::default())
    }

    pub fn with_config(engine: Arc<dyn FsEngine>, config: FsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                modes: ModeTable::with_default(config.default_file_mode),
                fds: FdTable::new(),
                config,
            }),
        }
    }

    /// Facade over a fresh [`MemoryEngine`] sized by `config.chunk_size`.
    pub fn in_memory(config: FsConfig) -> Self {
        let engine = Arc::new(MemoryEngine::with_chunk_size(config.chunk_size));
        Self::with_config(engine, config)
    }

    pub fn engine(&self) -> &Arc<dyn FsEngine> {
        &self.inner.engine
    }

    pub fn config(&self) -> &FsConfig {
        &self.inner.config
    }

    pub fn modes(&self) -> &ModeTable {
        &self.inner.modes
    }

    /// Number of descriptors currently open.
    pub fn open_descriptors(&self) -> usize {
        self.inner.fds.len()
    }

    /// Run a facade operation on the blocking pool.
    async fn blocking<T, F>(&self, syscall: &'static str, op: F) -> FsResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> FsResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| HandleError::internal(syscall, format!("task failed: {e}")))?
    }

    // ---- path operations ----

    pub async fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        let path = path.to_string();
        self.blocking("truncate", move |fs| fs.truncate(&path, len)).await
    }

    pub fn truncate_sync(&self, path: &str, len: u64) -> FsResult<()> {
        self.inner.truncate(path, len)
    }

    pub async fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        let (from, to) = (from.to_string(), to.to_string());
        self.blocking("rename", move |fs| fs.rename(&from, &to)).await
    }

    pub fn rename_sync(&self, from: &str, to: &str) -> FsResult<()> {
        self.inner.rename(from, to)
    }

    pub async fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        let path = path.to_string();
        self.blocking("scandir", move |fs| fs.readdir(&path)).await
    }

    pub fn readdir_sync(&self, path: &str) -> FsResult<Vec<String>> {
        self.inner.readdir(path)
    }

    pub async fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        let path = path.to_string();
        self.blocking("chown", move |fs| fs.chown(&path, uid, gid)).await
    }

    pub fn chown_sync(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.inner.chown(path, uid, gid)
    }

    /// Same as [`chown`](Self::chown): the engine has no link-level owner.
    pub async fn lchown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.chown(path, uid, gid).await
    }

    pub fn lchown_sync(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.chown_sync(path, uid, gid)
    }

    pub async fn readlink(&self, path: &str) -> FsResult<String> {
        let path = path.to_string();
        self.blocking("readlink", move |fs| fs.readlink(&path)).await
    }

    pub fn readlink_sync(&self, path: &str) -> FsResult<String> {
        self.inner.readlink(path)
    }

    pub async fn unlink(&self, path: &str) -> FsResult<()> {
        let path = path.to_string();
        self.blocking("unlink", move |fs| fs.unlink(&path)).await
    }

    pub fn unlink_sync(&self, path: &str) -> FsResult<()> {
        self.inner.unlink(path)
    }

    pub async fn rmdir(&self, path: &str) -> FsResult<()> {
        let path = path.to_string();
        self.blocking("rmdir", move |fs| fs.rmdir(&path)).await
    }

    pub fn rmdir_sync(&self, path: &str) -> FsResult<()> {
        self.inner.rmdir(path)
    }

    pub async fn stat(&self, path: &str) -> FsResult<Stats> {
        let path = path.to_string();
        self.blocking("stat", move |fs| fs.stat(&path)).await
    }

    pub fn stat_sync(&self, path: &str) -> FsResult<Stats> {
        self.inner.stat(path)
    }

    pub async fn lstat(&self, path: &str) -> FsResult<Stats> {
        let path = path.to_string();
        self.blocking("lstat", move |fs| fs.lstat(&path)).await
    }

    pub fn lstat_sync(&self, path: &str) -> FsResult<Stats> {
        self.inner.lstat(path)
    }

    /// Whether `path` exists. Engine failures count as absent.
    pub async fn exists(&self, path: &str) -> bool {
        let path = path.to_string();
        self.blocking("access", move |fs| Ok(fs.exists(&path)))
            .await
            .unwrap_or(false)
    }

    pub fn exists_sync(&self, path: &str) -> bool {
        self.inner.exists(path)
    }

    /// Read a whole file, decoded when `encoding` is given.
    pub async fn read_file(&self, path: &str, encoding: Option<&str>) -> FsResult<ReadResult> {
        let encoding = Encoding::parse(encoding)?;
        let path = path.to_string();
        self.blocking("open", move |fs| fs.read_file(&path, encoding))
            .await
    }

    pub fn read_file_sync(&self, path: &str, encoding: Option<&str>) -> FsResult<ReadResult> {
        let encoding = Encoding::parse(encoding)?;
        self.inner.read_file(path, encoding)
    }

    pub async fn write_file(&self, path: &str, data: impl Into<Bytes>) -> FsResult<()> {
        let path = path.to_string();
        let data = data.into();
        self.blocking("open", move |fs| fs.write_file(&path, data))
            .await
    }

    pub fn write_file_sync(&self, path: &str, data: impl Into<Bytes>) -> FsResult<()> {
        self.inner.write_file(path, data.into())
    }

    /// Write text, encoded with `encoding` (utf8 when `None`).
    pub async fn write_file_str(
        &self,
        path: &str,
        data: &str,
        encoding: Option<&str>,
    ) -> FsResult<()> {
        let bytes = encode_text(data, encoding)?;
        self.write_file(path, bytes).await
    }

    pub fn write_file_str_sync(
        &self,
        path: &str,
        data: &str,
        encoding: Option<&str>,
    ) -> FsResult<()> {
        let bytes = encode_text(data, encoding)?;
        self.write_file_sync(path, bytes)
    }

    /// Change permissions. A zero mode means the default file mode.
    pub async fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        let perms = self.perms(Some(mode))?;
        let path = path.to_string();
        self.blocking("chmod", move |fs| fs.chmod(&path, &perms))
            .await
    }

    pub fn chmod_sync(&self, path: &str, mode: u32) -> FsResult<()> {
        let perms = self.perms(Some(mode))?;
        self.inner.chmod(path, &perms)
    }

    /// Same as [`chmod`](Self::chmod): the engine has no link-level mode.
    pub async fn lchmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.chmod(path, mode).await
    }

    pub fn lchmod_sync(&self, path: &str, mode: u32) -> FsResult<()> {
        self.chmod_sync(path, mode)
    }

    /// Create a directory (parents are never created).
    ///
    /// `None` or zero uses the default directory mode, `0o777` unless
    /// configured otherwise.
    pub async fn mkdir(&self, path: &str, mode: Option<u32>) -> FsResult<()> {
        let perms = self.dir_perms(mode)?;
        let path = path.to_string();
        self.blocking("mkdir", move |fs| fs.mkdir(&path, &perms))
            .await
    }

    pub fn mkdir_sync(&self, path: &str, mode: Option<u32>) -> FsResult<()> {
        let perms = self.dir_perms(mode)?;
        self.inner.mkdir(path, &perms)
    }

    /// Create `path` as a symbolic link to `target`.
    pub async fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        let (target, path) = (target.to_string(), path.to_string());
        self.blocking("symlink", move |fs| fs.symlink(&target, &path))
            .await
    }

    pub fn symlink_sync(&self, target: &str, path: &str) -> FsResult<()> {
        self.inner.symlink(target, path)
    }

    /// The engine only has symbolic links, so `link` creates one.
    pub async fn link(&self, existing: &str, new_path: &str) -> FsResult<()> {
        self.symlink(existing, new_path).await
    }

    pub fn link_sync(&self, existing: &str, new_path: &str) -> FsResult<()> {
        self.symlink_sync(existing, new_path)
    }

    // ---- descriptor operations ----

    /// Open `path` with a Node flag token (`r`, `w+`, ...).
    ///
    /// `mode` applies when the file is created; `None` or zero uses the
    /// default file mode.
    pub async fn open(&self, path: &str, flags: &str, mode: Option<u32>) -> FsResult<Fd> {
        let flags = OpenFlags::from_token(flags);
        let perms = self.perms(mode)?;
        let path = path.to_string();
        self.blocking("open", move |fs| fs.open(&path, flags, &perms))
            .await
    }

    pub fn open_sync(&self, path: &str, flags: &str, mode: Option<u32>) -> FsResult<Fd> {
        let flags = OpenFlags::from_token(flags);
        let perms = self.perms(mode)?;
        self.inner.open(path, flags, &perms)
    }

    /// Release a descriptor. Unknown descriptors fail with `EBADF`.
    pub async fn close(&self, fd: Fd) -> FsResult<()> {
        self.blocking("close", move |fs| fs.close(fd)).await
    }

    pub fn close_sync(&self, fd: Fd) -> FsResult<()> {
        self.inner.close(fd)
    }

    /// Read up to `len` bytes.
    ///
    /// With `position` the read is positional and leaves the cursor alone;
    /// without it the read starts at the cursor and advances it.
    pub async fn read(&self, fd: Fd, len: usize, position: Option<u64>) -> FsResult<Bytes> {
        self.blocking("read", move |fs| fs.read(fd, len, position))
            .await
    }

    pub async fn fsync(&self, fd: Fd) -> FsResult<()> {
        self.blocking("fsync", move |fs| fs.fsync(fd)).await
    }

    pub fn fsync_sync(&self, fd: Fd) -> FsResult<()> {
        self.inner.fsync(fd)
    }

    pub async fn ftruncate(&self, fd: Fd, len: u64) -> FsResult<()> {
        self.blocking("ftruncate", move |fs| fs.ftruncate(fd, len))
            .await
    }

    pub fn ftruncate_sync(&self, fd: Fd, len: u64) -> FsResult<()> {
        self.inner.ftruncate(fd, len)
    }

    /// Change the mode of the file behind `fd`.
    pub async fn fchmod(&self, fd: Fd, mode: u32) -> FsResult<()> {
        let perms = self.perms(Some(mode))?;
        self.blocking("fchmod", move |fs| fs.fchmod(fd, &perms))
            .await
    }

    pub fn fchmod_sync(&self, fd: Fd, mode: u32) -> FsResult<()> {
        let perms = self.perms(Some(mode))?;
        self.inner.fchmod(fd, &perms)
    }

    pub async fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        self.blocking("fchown", move |fs| fs.fchown(fd, uid, gid))
            .await
    }

    pub fn fchown_sync(&self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        self.inner.fchown(fd, uid, gid)
    }

    // ---- streams ----

    /// Open a readable stream over `path`.
    ///
    /// The range is validated before the engine is touched. With
    /// `options.fd` the stream takes the descriptor out of the table and
    /// reads through it (the path is then informational). Must be called
    /// within a tokio runtime.
    pub fn create_read_stream(&self, path: &str, options: ReadStreamOptions) -> FsResult<ReadStream> {
        options.validate()?;
        let file = match options.fd {
            Some(fd) => Some(self.inner.fds.take("read", fd)?.file),
            None => None,
        };
        ReadStream::spawn(
            self.inner.engine.clone(),
            &self.inner.modes,
            path.to_string(),
            options,
            file,
        )
    }

    /// [`create_read_stream`](Self::create_read_stream) with options given as
    /// a JSON object, defaults taken from this facade's config.
    pub fn create_read_stream_json(&self, path: &str, options: &Value) -> FsResult<ReadStream> {
        let options = ReadStreamOptions::from_json(options, &self.inner.config)?;
        self.create_read_stream(path, options)
    }

    /// Default stream options from this facade's config.
    pub fn read_stream_options(&self) -> ReadStreamOptions {
        ReadStreamOptions::from_config(&self.inner.config)
    }

    // ---- not implemented ----

    pub async fn realpath(&self, _path: &str) -> FsResult<String> {
        Err(FsError::NotImplemented("realpath"))
    }

    pub fn realpath_sync(&self, _path: &str) -> FsResult<String> {
        Err(FsError::NotImplemented("realpathSync"))
    }

    pub async fn utimes(&self, _path: &str, _atime_ms: u64, _mtime_ms: u64) -> FsResult<()> {
        Err(FsError::NotImplemented("utimes"))
    }

    pub fn utimes_sync(&self, _path: &str, _atime_ms: u64, _mtime_ms: u64) -> FsResult<()> {
        Err(FsError::NotImplemented("utimesSync"))
    }

    pub async fn futimes(&self, _fd: Fd, _atime_ms: u64, _mtime_ms: u64) -> FsResult<()> {
        Err(FsError::NotImplemented("futimes"))
    }

    pub fn futimes_sync(&self, _fd: Fd, _atime_ms: u64, _mtime_ms: u64) -> FsResult<()> {
        Err(FsError::NotImplemented("futimesSync"))
    }

    pub async fn write(&self, _fd: Fd, _data: &[u8], _position: Option<u64>) -> FsResult<usize> {
        Err(FsError::NotImplemented("write"))
    }

    pub fn write_sync(&self, _fd: Fd, _data: &[u8], _position: Option<u64>) -> FsResult<usize> {
        Err(FsError::NotImplemented("writeSync"))
    }

    /// Only the async [`read`](Self::read) is provided.
    pub fn read_sync(&self, _fd: Fd, _len: usize, _position: Option<u64>) -> FsResult<Bytes> {
        Err(FsError::NotImplemented("readSync"))
    }

    pub async fn append_file(&self, _path: &str, _data: &[u8]) -> FsResult<()> {
        Err(FsError::NotImplemented("appendFile"))
    }

    pub fn append_file_sync(&self, _path: &str, _data: &[u8]) -> FsResult<()> {
        Err(FsError::NotImplemented("appendFileSync"))
    }

    pub fn watch(&self, _path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented("watch"))
    }

    pub fn watch_file(&self, _path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented("watchFile"))
    }

    pub fn unwatch_file(&self, _path: &str) -> FsResult<()> {
        Err(FsError::NotImplemented("unwatchFile"))
    }

    fn perms(&self, mode: Option<u32>) -> FsResult<String> {
        Ok(self.inner.modes.permission_string(mode)?.to_string())
    }

    fn dir_perms(&self, mode: Option<u32>) -> FsResult<String> {
        let mode = mode
            .filter(|m| *m != 0)
            .unwrap_or(self.inner.config.default_dir_mode);
        self.perms(Some(mode))
    }
}

fn encode_text(data: &str, encoding: Option<&str>) -> FsResult<Vec<u8>> {
    Encoding::parse(encoding)?
        .unwrap_or(Encoding::Utf8)
        .encode(data)
}

impl Inner {
    fn truncate(&self, path: &str, len: u64) -> FsResult<()> {
        self.engine
            .truncate(path, len)
            .map_err(|e| HandleError::from_io("truncate", path, e).into())
    }

    fn rename(&self, from: &str, to: &str) -> FsResult<()> {
        self.engine
            .rename(from, to)
            .map_err(|e| HandleError::from_io_two("rename", from, to, e).into())
    }

    fn readdir(&self, path: &str) -> FsResult<Vec<String>> {
        self.engine
            .read_dir(path)
            .map_err(|e| HandleError::from_io("scandir", path, e).into())
    }

    fn chown(&self, path: &str, uid: u32, gid: u32) -> FsResult<()> {
        self.engine
            .chown(path, uid, gid)
            .map_err(|e| HandleError::from_io("chown", path, e).into())
    }

    fn readlink(&self, path: &str) -> FsResult<String> {
        self.engine
            .read_symlink(path)
            .map_err(|e| HandleError::from_io("readlink", path, e).into())
    }

    fn unlink(&self, path: &str) -> FsResult<()> {
        self.engine
            .unlink(path)
            .map_err(|e| HandleError::from_io("unlink", path, e).into())
    }

    fn rmdir(&self, path: &str) -> FsResult<()> {
        self.engine
            .delete(path)
            .map_err(|e| HandleError::from_io("rmdir", path, e).into())
    }

    fn stat(&self, path: &str) -> FsResult<Stats> {
        self.engine
            .props(path)
            .map_err(|e| HandleError::from_io("stat", path, e).into())
    }

    fn lstat(&self, path: &str) -> FsResult<Stats> {
        self.engine
            .lprops(path)
            .map_err(|e| HandleError::from_io("lstat", path, e).into())
    }

    fn exists(&self, path: &str) -> bool {
        match self.engine.exists(path) {
            Ok(found) => found,
            Err(e) => {
                debug!(path, error = %e, "exists check failed");
                false
            }
        }
    }

    fn read_file(&self, path: &str, encoding: Option<Encoding>) -> FsResult<ReadResult> {
        let bytes = self
            .engine
            .read_file(path)
            .map_err(|e| HandleError::from_io("open", path, e))?;
        match encoding {
            Some(encoding) => Ok(ReadResult::String(encoding.decode(&bytes)?)),
            None => Ok(ReadResult::Bytes(bytes)),
        }
    }

    fn write_file(&self, path: &str, data: Bytes) -> FsResult<()> {
        self.engine
            .write_file(path, data)
            .map_err(|e| HandleError::from_io("open", path, e).into())
    }

    fn chmod(&self, path: &str, perms: &str) -> FsResult<()> {
        self.engine
            .chmod(path, perms)
            .map_err(|e| HandleError::from_io("chmod", path, e).into())
    }

    fn mkdir(&self, path: &str, perms: &str) -> FsResult<()> {
        self.engine
            .mkdir(path, perms, false)
            .map_err(|e| HandleError::from_io("mkdir", path, e).into())
    }

    fn symlink(&self, target: &str, path: &str) -> FsResult<()> {
        self.engine
            .symlink(path, target)
            .map_err(|e| HandleError::from_io_two("symlink", target, path, e).into())
    }

    fn open(&self, path: &str, flags: OpenFlags, perms: &str) -> FsResult<Fd> {
        let file = self
            .engine
            .open(path, perms, flags.read, flags.write, flags.create)
            .map_err(|e| HandleError::from_io("open", path, e))?;
        let fd = self.fds.insert(file, path.to_string());
        debug!(path, fd = fd.0, ?flags, "opened descriptor");
        Ok(fd)
    }

    fn close(&self, fd: Fd) -> FsResult<()> {
        let entry = self.fds.take("close", fd)?;
        debug!(path = %entry.path, fd = fd.0, "closing descriptor");
        self.engine
            .close(entry.file)
            .map_err(|e| HandleError::from_io("close", &entry.path, e).into())
    }

    fn read(&self, fd: Fd, len: usize, position: Option<u64>) -> FsResult<Bytes> {
        let entry = self.fds.get("read", fd)?;
        let at = position.unwrap_or(entry.position);
        let bytes = entry
            .file
            .read(at, len)
            .map_err(|e| HandleError::from_io("read", &entry.path, e))?;
        if position.is_none() {
            self.fds.advance(fd, bytes.len() as u64);
        }
        Ok(bytes)
    }

    fn fsync(&self, fd: Fd) -> FsResult<()> {
        let entry = self.fds.get("fsync", fd)?;
        entry
            .file
            .flush()
            .map_err(|e| HandleError::from_io("fsync", &entry.path, e).into())
    }

    fn ftruncate(&self, fd: Fd, len: u64) -> FsResult<()> {
        let entry = self.fds.get("ftruncate", fd)?;
        entry
            .file
            .truncate(len)
            .map_err(|e| HandleError::from_io("ftruncate", &entry.path, e).into())
    }

    fn fchmod(&self, fd: Fd, perms: &str) -> FsResult<()> {
        let entry = self.fds.get("fchmod", fd)?;
        self.engine
            .chmod(&entry.path, perms)
            .map_err(|e| HandleError::from_io("fchmod", &entry.path, e).into())
    }

    fn fchown(&self, fd: Fd, uid: u32, gid: u32) -> FsResult<()> {
        let entry = self.fds.get("fchown", fd)?;
        self.engine
            .chown(&entry.path, uid, gid)
            .map_err(|e| HandleError::from_io("fchown", &entry.path, e).into())
    }
}
