//! Contract of the consumed AFP client library.
//!
//! The wire protocol and the local helper daemon live behind this trait;
//! the worker core treats every call as synchronous, blocking, and opaque.
//! Handles returned by the library are capability tokens owned by the
//! library side. They are never dereferenced here, only passed back
//! verbatim and released on teardown paths.

/// Result code reported by the underlying library.
///
/// This is the union of protocol-level outcomes and daemon/transport
/// failures; [`crate::classify`] maps it onto the external taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfpCode {
    Ok,
    NotFound,
    AccessDenied,
    Exists,
    AuthFailed,
    /// Server name could not be resolved.
    NoServer,
    HostUnreachable,
    ConnRefused,
    NetUnreachable,
    TimedOut,
    /// Call issued against a server session the daemon no longer knows.
    NotConnected,
    /// Call issued against a volume the daemon no longer has attached.
    NotAttached,
    /// The daemon answered but reported an internal failure.
    DaemonError,
    /// The daemon did not answer at all.
    DaemonUnreachable,
    Unsupported,
    Misc,
}

impl AfpCode {
    pub fn is_ok(self) -> bool {
        self == AfpCode::Ok
    }
}

/// Opaque server session handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServerId(pub u64);

/// Opaque volume attachment handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VolumeId(pub u64);

/// Opaque open-file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub u64);

/// Authentication mechanisms offered to the server during connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMech {
    /// Offer every mechanism the library supports.
    #[default]
    Any,
    ClearText,
    Dhx2,
}

/// Metadata record for one filesystem object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRecord {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    /// Unix permission bits.
    pub mode: u32,
    /// Modification time, seconds since the epoch.
    pub mtime: i64,
    pub uid: u32,
    pub gid: u32,
}

/// Filesystem statistics for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: u64,
    pub blocks_total: u64,
    pub blocks_free: u64,
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Read-write even for pure uploads; some servers mishandle
    /// write-only opens.
    ReadWrite,
}

/// Outcome of a connect call.
#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub code: AfpCode,
    pub server: Option<ServerId>,
    /// Server greeting, if any. Logged, never surfaced as data.
    pub login_message: Option<String>,
}

/// Outcome of an attach or attachment-query call.
#[derive(Debug, Clone, Copy)]
pub struct AttachOutcome {
    pub code: AfpCode,
    pub volume: Option<VolumeId>,
}

/// The consumed library surface. All calls block.
pub trait AfpClient {
    fn connect(
        &mut self,
        server: &str,
        port: Option<u16>,
        username: &str,
        password: &str,
        mechs: AuthMech,
    ) -> ConnectOutcome;

    fn disconnect(&mut self, server: ServerId) -> AfpCode;

    fn attach(&mut self, server: ServerId, volume: &str) -> AttachOutcome;

    /// Query the handle of a volume the daemon already has attached,
    /// by name, without attaching again.
    fn volume_handle(&mut self, server: ServerId, volume: &str) -> AttachOutcome;

    fn volume_list(&mut self, server: ServerId, max: u32) -> (AfpCode, Vec<String>);

    fn stat(&mut self, volume: VolumeId, path: &str) -> (AfpCode, Option<StatRecord>);

    /// Enumerate one page of directory entries. The bool flag signals
    /// end of data.
    fn read_dir(
        &mut self,
        volume: VolumeId,
        path: &str,
        start: u32,
        count: u32,
    ) -> (AfpCode, Vec<StatRecord>, bool);

    fn open(&mut self, volume: VolumeId, path: &str, mode: OpenMode) -> (AfpCode, Option<FileId>);

    /// Read up to `len` bytes at `offset`. The bool flag signals end of file.
    fn read(&mut self, volume: VolumeId, file: FileId, offset: u64, len: u32)
        -> (AfpCode, Vec<u8>, bool);

    /// Write `data` at `offset`, returning the number of bytes written.
    fn write(&mut self, volume: VolumeId, file: FileId, offset: u64, data: &[u8])
        -> (AfpCode, u64);

    fn close(&mut self, volume: VolumeId, file: FileId) -> AfpCode;

    fn create(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode;

    fn truncate(&mut self, volume: VolumeId, path: &str) -> AfpCode;

    fn mkdir(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode;

    fn unlink(&mut self, volume: VolumeId, path: &str) -> AfpCode;

    fn rmdir(&mut self, volume: VolumeId, path: &str) -> AfpCode;

    fn rename(&mut self, volume: VolumeId, from: &str, to: &str) -> AfpCode;

    fn chmod(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode;

    fn statfs(&mut self, volume: VolumeId) -> (AfpCode, Option<FsStats>);
}
