//! Operation executor.
//!
//! Each verb drives the session state machine to the state it needs
//! (connected for server-root operations, attached for anything inside
//! a volume), issues its calls against the cached handles, and maps
//! failures through the classifier. A failure with a recoverable code
//! tears the session down and re-establishes it exactly once; a second
//! failure, or any fatal code, surfaces as-is. Streaming transfers are
//! the exception: once data has left the worker a mid-stream error is
//! final, partial output cannot be retracted.

use std::ffi::CStr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use crate::classify::{classify, is_recoverable};
use crate::client::{AfpClient, AfpCode, OpenMode, ServerId, StatRecord, VolumeId};
use crate::connect::{ConnectConfig, Connector};
use crate::coordination::CoordinationPaths;
use crate::creds::{CredentialPrompt, CredentialStore};
use crate::error::{Result, WorkerError};
use crate::mimetype;
use crate::session::SessionState;
use crate::target::Target;

/// Default streaming chunk size: 64 KiB.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Worker-wide tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding the cross-process coordination files.
    pub coordination_dir: PathBuf,
    pub connect: ConnectConfig,
    /// Transfer chunk size for get/put.
    pub chunk_size: usize,
    /// Directory enumeration page size.
    pub list_page_size: u32,
    /// Upper bound on the server-root volume enumeration.
    pub volume_list_max: u32,
    /// Delay before the single retry of an empty volume enumeration.
    pub volume_list_retry_delay: Duration,
    /// Emit a synthetic `.` entry ahead of directory listings.
    pub emit_self_entry: bool,
    pub default_file_mode: u32,
    pub default_dir_mode: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordination_dir: CoordinationPaths::default_dir(),
            connect: ConnectConfig::default(),
            chunk_size: CHUNK_SIZE,
            list_page_size: 64,
            volume_list_max: 256,
            volume_list_retry_delay: Duration::from_millis(500),
            emit_self_entry: true,
            default_file_mode: 0o644,
            default_dir_mode: 0o755,
        }
    }
}

/// Directory or file entry reported to the host dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub mode: u32,
    pub mtime: i64,
    pub owner: String,
    pub group: String,
    pub content_type: String,
}

impl Entry {
    fn from_stat(rec: &StatRecord) -> Self {
        let content_type = if rec.is_dir {
            mimetype::DIRECTORY.to_string()
        } else {
            mimetype::guess(&rec.name).to_string()
        };
        Self {
            name: rec.name.clone(),
            size: rec.size,
            is_dir: rec.is_dir,
            mode: rec.mode,
            mtime: rec.mtime,
            owner: user_name(rec.uid),
            group: group_name(rec.gid),
            content_type,
        }
    }

    /// Root entry synthesized without a metadata round trip.
    fn synthetic_dir(name: String) -> Self {
        let uid = unsafe { libc::geteuid() };
        let gid = unsafe { libc::getegid() };
        Self {
            name,
            size: 0,
            is_dir: true,
            mode: 0o755,
            mtime: 0,
            owner: user_name(uid),
            group: group_name(gid),
            content_type: mimetype::DIRECTORY.to_string(),
        }
    }
}

/// Free-space figures for a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
    pub total: u64,
    pub available: u64,
}

/// Receives a download. Chunks arrive in order; a final empty chunk
/// signals completion.
pub trait DataSink {
    fn total_size(&mut self, size: u64);
    fn content_type(&mut self, content_type: &str);
    fn data(&mut self, chunk: &[u8]) -> Result<()>;
}

/// Supplies an upload chunk by chunk; an empty chunk signals end of
/// input.
pub trait DataSource {
    fn next_chunk(&mut self) -> Result<Vec<u8>>;
}

/// One worker instance: the client library, the credential sources, and
/// the process-wide session cache, executing one operation at a time.
pub struct Worker<C: AfpClient, S: CredentialStore, P: CredentialPrompt> {
    client: C,
    store: S,
    prompt: P,
    config: WorkerConfig,
    session: SessionState,
}

impl<C: AfpClient, S: CredentialStore, P: CredentialPrompt> Worker<C, S, P> {
    pub fn new(client: C, store: S, prompt: P, config: WorkerConfig) -> Self {
        Self {
            client,
            store,
            prompt,
            config,
            session: SessionState::new(),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn stat(&mut self, ident: &str) -> Result<Entry> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "stat");
        if target.is_server_root() {
            self.ensure_server(&mut target)?;
            return Ok(Entry::synthetic_dir(target.server.clone()));
        }
        if target.is_volume_root() {
            self.ensure_volume(&mut target)?;
            let volume = target.volume.clone().unwrap_or_default();
            return Ok(Entry::synthetic_dir(volume));
        }
        let path = target.path_or_root().to_string();
        let rec = self.with_attached(&mut target, |client, vol| {
            match client.stat(vol, &path) {
                (AfpCode::Ok, Some(rec)) => Ok(rec),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (code, _) => Err(code),
            }
        })?;
        Ok(Entry::from_stat(&rec))
    }

    pub fn list_dir(&mut self, ident: &str) -> Result<Vec<Entry>> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "list_dir");
        if target.is_server_root() {
            return self.list_volumes(&mut target);
        }
        let path = target.path_or_root().to_string();
        let page_size = self.config.list_page_size;
        let emit_self = self.config.emit_self_entry;
        self.with_attached(&mut target, |client, vol| {
            let mut entries = Vec::new();
            if emit_self {
                // immediately available root item for consumers that
                // render before a separate stat completes
                entries.push(Entry::synthetic_dir(".".to_string()));
            }
            let mut start = 0u32;
            loop {
                let (code, page, end) = client.read_dir(vol, &path, start, page_size);
                if !code.is_ok() {
                    return Err(code);
                }
                let got = page.len() as u32;
                entries.extend(page.iter().map(Entry::from_stat));
                if end || got == 0 {
                    break;
                }
                start += got;
            }
            Ok(entries)
        })
    }

    fn list_volumes(&mut self, target: &mut Target) -> Result<Vec<Entry>> {
        let max = self.config.volume_list_max;
        let names = self.with_server(target, |client, server| {
            match client.volume_list(server, max) {
                (AfpCode::Ok, names) => Ok(names),
                (code, _) => Err(code),
            }
        })?;
        let names = if names.is_empty() {
            // the daemon may still be enumerating shares; try once more
            thread::sleep(self.config.volume_list_retry_delay);
            self.with_server(target, |client, server| {
                match client.volume_list(server, max) {
                    (AfpCode::Ok, names) => Ok(names),
                    (code, _) => Err(code),
                }
            })?
        } else {
            names
        };
        Ok(names.into_iter().map(Entry::synthetic_dir).collect())
    }

    pub fn get(&mut self, ident: &str, sink: &mut dyn DataSink) -> Result<()> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "get");
        if target.is_server_root() || target.is_volume_root() {
            return Err(WorkerError::Unsupported(format!(
                "cannot read a directory: {}",
                target.subject()
            )));
        }
        let path = target.path_or_root().to_string();
        let rec = self.with_attached(&mut target, |client, vol| {
            match client.stat(vol, &path) {
                (AfpCode::Ok, Some(rec)) => Ok(rec),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (code, _) => Err(code),
            }
        })?;
        if rec.is_dir {
            return Err(WorkerError::Unsupported(format!(
                "cannot read a directory: {}",
                target.subject()
            )));
        }
        sink.total_size(rec.size);
        sink.content_type(mimetype::guess(&rec.name));

        let file = self.with_attached(&mut target, |client, vol| {
            match client.open(vol, &path, OpenMode::Read) {
                (AfpCode::Ok, Some(file)) => Ok(file),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (code, _) => Err(code),
            }
        })?;
        let vol = self
            .session
            .volume
            .ok_or_else(|| WorkerError::Internal("attachment lost mid-operation".into()))?;

        let chunk_len = self.config.chunk_size as u32;
        let mut offset = 0u64;
        loop {
            let (code, data, eof) = self.client.read(vol, file, offset, chunk_len);
            if !code.is_ok() {
                let _ = self.client.close(vol, file);
                return Err(classify(code, &target.subject()));
            }
            if data.is_empty() {
                break;
            }
            offset += data.len() as u64;
            if let Err(e) = sink.data(&data) {
                let _ = self.client.close(vol, file);
                return Err(e);
            }
            if eof {
                break;
            }
        }
        let _ = self.client.close(vol, file);
        sink.data(&[])
    }

    pub fn put(
        &mut self,
        ident: &str,
        source: &mut dyn DataSource,
        mode: Option<u32>,
        overwrite: bool,
    ) -> Result<()> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, overwrite, "put");
        if target.is_server_root() || target.is_volume_root() {
            return Err(WorkerError::Unsupported(format!(
                "cannot write to {}",
                target.subject()
            )));
        }
        let path = target.path_or_root().to_string();
        let existing = self.with_attached(&mut target, |client, vol| {
            match client.stat(vol, &path) {
                (AfpCode::Ok, Some(rec)) => Ok(Some(rec)),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (AfpCode::NotFound, _) => Ok(None),
                (code, _) => Err(code),
            }
        })?;
        if let Some(rec) = &existing {
            if !overwrite {
                return Err(WorkerError::AlreadyExists(target.subject()));
            }
            if rec.is_dir {
                return Err(WorkerError::Unsupported(format!(
                    "cannot overwrite a directory: {}",
                    target.subject()
                )));
            }
        }

        let create_mode = mode.unwrap_or(self.config.default_file_mode);
        let is_new = existing.is_none();
        self.with_attached(&mut target, |client, vol| {
            let code = if is_new {
                client.create(vol, &path, create_mode)
            } else {
                client.truncate(vol, &path)
            };
            if code.is_ok() {
                Ok(())
            } else {
                Err(code)
            }
        })?;

        let file = self.with_attached(&mut target, |client, vol| {
            match client.open(vol, &path, OpenMode::ReadWrite) {
                (AfpCode::Ok, Some(file)) => Ok(file),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (code, _) => Err(code),
            }
        })?;
        let vol = self
            .session
            .volume
            .ok_or_else(|| WorkerError::Internal("attachment lost mid-operation".into()))?;

        let mut offset = 0u64;
        loop {
            let chunk = match source.next_chunk() {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = self.client.close(vol, file);
                    return Err(e);
                }
            };
            if chunk.is_empty() {
                break;
            }
            let mut sent = 0usize;
            while sent < chunk.len() {
                let (code, written) = self.client.write(vol, file, offset, &chunk[sent..]);
                if !code.is_ok() {
                    let _ = self.client.close(vol, file);
                    return Err(classify(code, &target.subject()));
                }
                if written == 0 {
                    let _ = self.client.close(vol, file);
                    return Err(WorkerError::Internal(format!(
                        "zero-length write at offset {offset}"
                    )));
                }
                offset += written;
                sent += written as usize;
            }
        }
        let code = self.client.close(vol, file);
        if !code.is_ok() {
            return Err(classify(code, &target.subject()));
        }

        if let Some(bits) = mode {
            // the data is already safely written; a refused permission
            // change is logged, not surfaced
            let code = self.client.chmod(vol, &path, bits);
            if !code.is_ok() {
                tracing::warn!(
                    subject = %target.subject(),
                    ?code,
                    "could not apply permissions after put"
                );
            }
        }
        Ok(())
    }

    pub fn mkdir(&mut self, ident: &str, mode: Option<u32>) -> Result<()> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "mkdir");
        if target.is_server_root() || target.is_volume_root() {
            return Err(WorkerError::Unsupported(format!(
                "cannot create a volume: {}",
                target.subject()
            )));
        }
        let path = target.path_or_root().to_string();
        let bits = mode.unwrap_or(self.config.default_dir_mode);
        self.with_attached(&mut target, |client, vol| {
            let code = client.mkdir(vol, &path, bits);
            if code.is_ok() {
                Ok(())
            } else {
                Err(code)
            }
        })
    }

    pub fn delete(&mut self, ident: &str) -> Result<()> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "delete");
        // volumes and the server itself are never deletable; rejected
        // before any call goes out
        if target.is_server_root() || target.is_volume_root() {
            return Err(WorkerError::AccessDenied(target.subject()));
        }
        let path = target.path_or_root().to_string();
        let rec = self.with_attached(&mut target, |client, vol| {
            match client.stat(vol, &path) {
                (AfpCode::Ok, Some(rec)) => Ok(rec),
                (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                (code, _) => Err(code),
            }
        })?;
        let is_dir = rec.is_dir;
        self.with_attached(&mut target, |client, vol| {
            let code = if is_dir {
                client.rmdir(vol, &path)
            } else {
                client.unlink(vol, &path)
            };
            if code.is_ok() {
                Ok(())
            } else {
                Err(code)
            }
        })
    }

    pub fn rename(&mut self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let mut src_target = Target::parse(src)?;
        let dst_target = Target::parse(dst)?;
        tracing::debug!(src, dst, overwrite, "rename");
        if src_target.is_server_root()
            || src_target.is_volume_root()
            || dst_target.is_server_root()
            || dst_target.is_volume_root()
        {
            return Err(WorkerError::AccessDenied(src_target.subject()));
        }
        if src_target.server != dst_target.server || src_target.volume != dst_target.volume {
            return Err(WorkerError::Unsupported(format!(
                "rename across servers or volumes: {} -> {}",
                src_target.subject(),
                dst_target.subject()
            )));
        }
        let from = src_target.path_or_root().to_string();
        let to = dst_target.path_or_root().to_string();
        if !overwrite {
            let exists = self.with_attached(&mut src_target, |client, vol| {
                match client.stat(vol, &to) {
                    (AfpCode::Ok, Some(_)) => Ok(true),
                    (AfpCode::NotFound, _) => Ok(false),
                    (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
                    (code, _) => Err(code),
                }
            })?;
            if exists {
                return Err(WorkerError::AlreadyExists(dst_target.subject()));
            }
        }
        self.with_attached(&mut src_target, |client, vol| {
            let code = client.rename(vol, &from, &to);
            if code.is_ok() {
                Ok(())
            } else {
                Err(code)
            }
        })
    }

    pub fn chmod(&mut self, ident: &str, mode: u32) -> Result<()> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, mode, "chmod");
        if target.is_server_root() {
            return Err(WorkerError::Unsupported(format!(
                "cannot change permissions of {}",
                target.subject()
            )));
        }
        let path = target.path_or_root().to_string();
        self.with_attached(&mut target, |client, vol| {
            let code = client.chmod(vol, &path, mode);
            if code.is_ok() {
                Ok(())
            } else {
                Err(code)
            }
        })
    }

    pub fn free_space(&mut self, ident: &str) -> Result<SpaceInfo> {
        let mut target = Target::parse(ident)?;
        tracing::debug!(ident, "free_space");
        if target.is_server_root() {
            return Err(WorkerError::Unsupported(format!(
                "free space requires a volume: {}",
                target.subject()
            )));
        }
        let stats = self.with_attached(&mut target, |client, vol| match client.statfs(vol) {
            (AfpCode::Ok, Some(stats)) => Ok(stats),
            (AfpCode::Ok, None) => Err(AfpCode::DaemonError),
            (code, _) => Err(code),
        })?;
        Ok(SpaceInfo {
            total: stats.block_size * stats.blocks_total,
            available: stats.block_size * stats.blocks_free,
        })
    }

    fn ensure_server(&mut self, target: &mut Target) -> Result<ServerId> {
        let paths = CoordinationPaths::in_dir(&self.config.coordination_dir);
        let mut connector = Connector {
            client: &mut self.client,
            store: &mut self.store,
            prompt: &mut self.prompt,
            config: &self.config.connect,
            paths: &paths,
        };
        connector.ensure_server(&mut self.session, target)
    }

    fn ensure_volume(&mut self, target: &mut Target) -> Result<(ServerId, VolumeId)> {
        let paths = CoordinationPaths::in_dir(&self.config.coordination_dir);
        let mut connector = Connector {
            client: &mut self.client,
            store: &mut self.store,
            prompt: &mut self.prompt,
            config: &self.config.connect,
            paths: &paths,
        };
        connector.ensure_volume(&mut self.session, target)
    }

    fn invalidate(&mut self) {
        self.session.clear_all(&mut self.client);
    }

    /// Run one underlying call against the attached volume, with the
    /// single re-establish-and-retry cycle for recoverable codes.
    fn with_attached<T, F>(&mut self, target: &mut Target, mut call: F) -> Result<T>
    where
        F: FnMut(&mut C, VolumeId) -> std::result::Result<T, AfpCode>,
    {
        let (_, vol) = self.ensure_volume(target)?;
        match call(&mut self.client, vol) {
            Ok(value) => Ok(value),
            Err(code) if is_recoverable(code) => {
                tracing::warn!(?code, subject = %target.subject(), "stale session, re-establishing");
                self.invalidate();
                let (_, vol) = self.ensure_volume(target)?;
                call(&mut self.client, vol).map_err(|code| classify(code, &target.subject()))
            }
            Err(code) => Err(classify(code, &target.subject())),
        }
    }

    /// Like [`Self::with_attached`] for calls that only need a server
    /// session.
    fn with_server<T, F>(&mut self, target: &mut Target, mut call: F) -> Result<T>
    where
        F: FnMut(&mut C, ServerId) -> std::result::Result<T, AfpCode>,
    {
        let server = self.ensure_server(target)?;
        match call(&mut self.client, server) {
            Ok(value) => Ok(value),
            Err(code) if is_recoverable(code) => {
                tracing::warn!(?code, server = %target.server, "stale session, re-establishing");
                self.invalidate();
                let server = self.ensure_server(target)?;
                call(&mut self.client, server).map_err(|code| classify(code, &target.subject()))
            }
            Err(code) => Err(classify(code, &target.subject())),
        }
    }
}

impl<C: AfpClient, S: CredentialStore, P: CredentialPrompt> Drop for Worker<C, S, P> {
    fn drop(&mut self) {
        // best-effort disconnect at process teardown
        self.session.clear_all(&mut self.client);
    }
}

fn user_name(uid: u32) -> String {
    let mut buf = vec![0u8; 1024];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut out: *mut libc::passwd = std::ptr::null_mut();
    let rc = unsafe {
        libc::getpwuid_r(
            uid,
            &mut pwd,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut out,
        )
    };
    if rc == 0 && !out.is_null() {
        let name = unsafe { CStr::from_ptr(pwd.pw_name) };
        if let Ok(name) = name.to_str() {
            return name.to_string();
        }
    }
    uid.to_string()
}

fn group_name(gid: u32) -> String {
    let mut buf = vec![0u8; 1024];
    let mut grp: libc::group = unsafe { std::mem::zeroed() };
    let mut out: *mut libc::group = std::ptr::null_mut();
    let rc = unsafe {
        libc::getgrgid_r(
            gid,
            &mut grp,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            &mut out,
        )
    };
    if rc == 0 && !out.is_null() {
        let name = unsafe { CStr::from_ptr(grp.gr_name) };
        if let Ok(name) = name.to_str() {
            return name.to_string();
        }
    }
    gid.to_string()
}
