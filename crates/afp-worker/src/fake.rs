//! In-memory stand-in for the consumed AFP library, plus credential
//! store/prompt fakes. Test support only.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// Install the test log subscriber once; `RUST_LOG` controls verbosity.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

use crate::client::{
    AfpClient, AfpCode, AttachOutcome, AuthMech, ConnectOutcome, FileId, FsStats, OpenMode,
    ServerId, StatRecord, VolumeId,
};
use crate::creds::{CredentialPrompt, CredentialStore, PromptReply};

#[derive(Debug, Clone)]
struct FakeNode {
    /// `None` marks a directory.
    data: Option<Vec<u8>>,
    mode: u32,
    mtime: i64,
    uid: u32,
    gid: u32,
}

impl FakeNode {
    fn dir() -> Self {
        Self {
            data: None,
            mode: 0o755,
            mtime: 1_700_000_000,
            uid: 0,
            gid: 0,
        }
    }

    fn file(data: Vec<u8>, mode: u32) -> Self {
        Self {
            data: Some(data),
            mode,
            mtime: 1_700_000_000,
            uid: 0,
            gid: 0,
        }
    }
}

#[derive(Debug, Default)]
struct FakeVolume {
    nodes: BTreeMap<String, FakeNode>,
}

/// Scripted in-memory protocol client.
///
/// Behaves like a well-working daemon by default; the public knobs
/// inject the failure modes the coordinator and executor must handle.
pub struct FakeClient {
    volumes: BTreeMap<String, FakeVolume>,

    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub attach_calls: u32,
    pub volume_handle_calls: u32,
    pub volume_list_calls: u32,
    pub stat_calls: u32,
    pub read_dir_calls: u32,
    pub unlink_calls: u32,
    pub rmdir_calls: u32,
    pub rename_calls: u32,

    /// Connect outcomes consumed front-first before real behavior.
    pub connect_failures: Vec<AfpCode>,
    /// Number of times connect reports success without a handle.
    pub connect_without_handle: u32,
    /// When set, only this username/password pair is accepted.
    pub accept_only: Option<(String, String)>,
    /// Attach reports "already attached" with no handle.
    pub attach_reports_exists: bool,
    /// The attachment-by-name query fails too.
    pub volume_handle_fails: bool,
    /// Permission changes fail.
    pub chmod_fails: bool,
    /// Fail exactly one upcoming operation call with this code.
    pub fail_next_op: Option<AfpCode>,
    /// Fail every operation call with this code.
    pub fail_ops_with: Option<AfpCode>,
    /// Report an empty volume list this many times.
    pub empty_volume_lists: u32,
    pub fs_stats: FsStats,

    connected: Option<ServerId>,
    attached: HashMap<u64, String>,
    open_files: HashMap<u64, (String, String)>,
    next_handle: u64,
}

impl FakeClient {
    pub fn new() -> Self {
        Self {
            volumes: BTreeMap::new(),
            connect_calls: 0,
            disconnect_calls: 0,
            attach_calls: 0,
            volume_handle_calls: 0,
            volume_list_calls: 0,
            stat_calls: 0,
            read_dir_calls: 0,
            unlink_calls: 0,
            rmdir_calls: 0,
            rename_calls: 0,
            connect_failures: Vec::new(),
            connect_without_handle: 0,
            accept_only: None,
            attach_reports_exists: false,
            volume_handle_fails: false,
            chmod_fails: false,
            fail_next_op: None,
            fail_ops_with: None,
            empty_volume_lists: 0,
            fs_stats: FsStats {
                block_size: 4096,
                blocks_total: 1000,
                blocks_free: 250,
            },
            connected: None,
            attached: HashMap::new(),
            open_files: HashMap::new(),
            next_handle: 0,
        }
    }

    pub fn add_volume(&mut self, name: &str) {
        let mut vol = FakeVolume::default();
        vol.nodes.insert("/".to_string(), FakeNode::dir());
        self.volumes.insert(name.to_string(), vol);
    }

    pub fn add_dir(&mut self, volume: &str, path: &str) {
        let vol = self.volumes.get_mut(volume).expect("unknown volume");
        vol.nodes.insert(path.to_string(), FakeNode::dir());
    }

    pub fn add_file(&mut self, volume: &str, path: &str, data: &[u8]) {
        let vol = self.volumes.get_mut(volume).expect("unknown volume");
        vol.nodes
            .insert(path.to_string(), FakeNode::file(data.to_vec(), 0o644));
    }

    pub fn file_data(&self, volume: &str, path: &str) -> Option<Vec<u8>> {
        self.volumes
            .get(volume)?
            .nodes
            .get(path)?
            .data
            .clone()
    }

    pub fn file_mode(&self, volume: &str, path: &str) -> Option<u32> {
        Some(self.volumes.get(volume)?.nodes.get(path)?.mode)
    }

    pub fn has_node(&self, volume: &str, path: &str) -> bool {
        self.volumes
            .get(volume)
            .is_some_and(|v| v.nodes.contains_key(path))
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn injected(&mut self) -> Option<AfpCode> {
        self.fail_next_op.take().or(self.fail_ops_with)
    }

    fn volume_name(&self, volume: VolumeId) -> Option<String> {
        self.attached.get(&volume.0).cloned()
    }

    fn record_for(name: &str, path: &str, node: &FakeNode) -> StatRecord {
        let leaf = if path == "/" {
            name.to_string()
        } else {
            path.rsplit('/').next().unwrap_or(path).to_string()
        };
        StatRecord {
            name: leaf,
            size: node.data.as_ref().map(|d| d.len() as u64).unwrap_or(0),
            is_dir: node.data.is_none(),
            mode: node.mode,
            mtime: node.mtime,
            uid: node.uid,
            gid: node.gid,
        }
    }

    fn parent_of(path: &str) -> &str {
        match path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &path[..idx],
            None => "/",
        }
    }

    fn children_of(vol: &FakeVolume, path: &str) -> Vec<String> {
        vol.nodes
            .keys()
            .filter(|k| k.as_str() != "/" && Self::parent_of(k) == path && k.as_str() != path)
            .cloned()
            .collect()
    }
}

impl Default for FakeClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AfpClient for FakeClient {
    fn connect(
        &mut self,
        _server: &str,
        _port: Option<u16>,
        username: &str,
        password: &str,
        _mechs: AuthMech,
    ) -> ConnectOutcome {
        self.connect_calls += 1;
        if !self.connect_failures.is_empty() {
            let code = self.connect_failures.remove(0);
            return ConnectOutcome {
                code,
                server: None,
                login_message: None,
            };
        }
        if let Some((user, pass)) = &self.accept_only {
            if user != username || pass != password {
                return ConnectOutcome {
                    code: AfpCode::AuthFailed,
                    server: None,
                    login_message: None,
                };
            }
        }
        if self.connect_without_handle > 0 {
            self.connect_without_handle -= 1;
            return ConnectOutcome {
                code: AfpCode::Ok,
                server: None,
                login_message: None,
            };
        }
        let id = ServerId(self.next_id());
        self.connected = Some(id);
        ConnectOutcome {
            code: AfpCode::Ok,
            server: Some(id),
            login_message: Some("Welcome".to_string()),
        }
    }

    fn disconnect(&mut self, _server: ServerId) -> AfpCode {
        self.disconnect_calls += 1;
        self.connected = None;
        self.attached.clear();
        self.open_files.clear();
        // dropping the session also resets daemon-side confusion
        self.attach_reports_exists = false;
        self.volume_handle_fails = false;
        AfpCode::Ok
    }

    fn attach(&mut self, _server: ServerId, volume: &str) -> AttachOutcome {
        self.attach_calls += 1;
        if !self.volumes.contains_key(volume) {
            return AttachOutcome {
                code: AfpCode::NotFound,
                volume: None,
            };
        }
        if self.attach_reports_exists {
            return AttachOutcome {
                code: AfpCode::Exists,
                volume: None,
            };
        }
        let id = self.next_id();
        self.attached.insert(id, volume.to_string());
        AttachOutcome {
            code: AfpCode::Ok,
            volume: Some(VolumeId(id)),
        }
    }

    fn volume_handle(&mut self, _server: ServerId, volume: &str) -> AttachOutcome {
        self.volume_handle_calls += 1;
        if self.volume_handle_fails || !self.volumes.contains_key(volume) {
            return AttachOutcome {
                code: AfpCode::DaemonError,
                volume: None,
            };
        }
        let id = self.next_id();
        self.attached.insert(id, volume.to_string());
        AttachOutcome {
            code: AfpCode::Ok,
            volume: Some(VolumeId(id)),
        }
    }

    fn volume_list(&mut self, _server: ServerId, max: u32) -> (AfpCode, Vec<String>) {
        self.volume_list_calls += 1;
        if let Some(code) = self.injected() {
            return (code, Vec::new());
        }
        if self.empty_volume_lists > 0 {
            self.empty_volume_lists -= 1;
            return (AfpCode::Ok, Vec::new());
        }
        let names: Vec<String> = self.volumes.keys().take(max as usize).cloned().collect();
        (AfpCode::Ok, names)
    }

    fn stat(&mut self, volume: VolumeId, path: &str) -> (AfpCode, Option<StatRecord>) {
        self.stat_calls += 1;
        if let Some(code) = self.injected() {
            return (code, None);
        }
        let Some(name) = self.volume_name(volume) else {
            return (AfpCode::NotAttached, None);
        };
        let vol = &self.volumes[&name];
        match vol.nodes.get(path) {
            Some(node) => (AfpCode::Ok, Some(Self::record_for(&name, path, node))),
            None => (AfpCode::NotFound, None),
        }
    }

    fn read_dir(
        &mut self,
        volume: VolumeId,
        path: &str,
        start: u32,
        count: u32,
    ) -> (AfpCode, Vec<StatRecord>, bool) {
        self.read_dir_calls += 1;
        if let Some(code) = self.injected() {
            return (code, Vec::new(), true);
        }
        let Some(name) = self.volume_name(volume) else {
            return (AfpCode::NotAttached, Vec::new(), true);
        };
        let vol = &self.volumes[&name];
        match vol.nodes.get(path) {
            Some(node) if node.data.is_none() => {}
            Some(_) => return (AfpCode::Misc, Vec::new(), true),
            None => return (AfpCode::NotFound, Vec::new(), true),
        }
        let children = Self::children_of(vol, path);
        let page: Vec<StatRecord> = children
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .map(|child| Self::record_for(&name, child, &vol.nodes[child]))
            .collect();
        let end = (start as usize + page.len()) >= children.len();
        (AfpCode::Ok, page, end)
    }

    fn open(&mut self, volume: VolumeId, path: &str, _mode: OpenMode) -> (AfpCode, Option<FileId>) {
        if let Some(code) = self.injected() {
            return (code, None);
        }
        let Some(name) = self.volume_name(volume) else {
            return (AfpCode::NotAttached, None);
        };
        match self.volumes[&name].nodes.get(path) {
            Some(node) if node.data.is_some() => {
                let id = self.next_id();
                self.open_files.insert(id, (name, path.to_string()));
                (AfpCode::Ok, Some(FileId(id)))
            }
            Some(_) => (AfpCode::AccessDenied, None),
            None => (AfpCode::NotFound, None),
        }
    }

    fn read(
        &mut self,
        _volume: VolumeId,
        file: FileId,
        offset: u64,
        len: u32,
    ) -> (AfpCode, Vec<u8>, bool) {
        if let Some(code) = self.injected() {
            return (code, Vec::new(), false);
        }
        let Some((vol, path)) = self.open_files.get(&file.0).cloned() else {
            return (AfpCode::Misc, Vec::new(), false);
        };
        let data = self.volumes[&vol].nodes[&path]
            .data
            .clone()
            .unwrap_or_default();
        let start = (offset as usize).min(data.len());
        let stop = (start + len as usize).min(data.len());
        let eof = stop == data.len();
        (AfpCode::Ok, data[start..stop].to_vec(), eof)
    }

    fn write(
        &mut self,
        _volume: VolumeId,
        file: FileId,
        offset: u64,
        data: &[u8],
    ) -> (AfpCode, u64) {
        if let Some(code) = self.injected() {
            return (code, 0);
        }
        let Some((vol, path)) = self.open_files.get(&file.0).cloned() else {
            return (AfpCode::Misc, 0);
        };
        let node = self
            .volumes
            .get_mut(&vol)
            .and_then(|v| v.nodes.get_mut(&path))
            .expect("open file lost its node");
        let buf = node.data.get_or_insert_with(Vec::new);
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        (AfpCode::Ok, data.len() as u64)
    }

    fn close(&mut self, _volume: VolumeId, file: FileId) -> AfpCode {
        self.open_files.remove(&file.0);
        AfpCode::Ok
    }

    fn create(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode {
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        let vol = self.volumes.get_mut(&name).expect("attached volume gone");
        if vol.nodes.contains_key(path) {
            return AfpCode::Exists;
        }
        if !vol
            .nodes
            .get(Self::parent_of(path))
            .is_some_and(|n| n.data.is_none())
        {
            return AfpCode::NotFound;
        }
        vol.nodes
            .insert(path.to_string(), FakeNode::file(Vec::new(), mode));
        AfpCode::Ok
    }

    fn truncate(&mut self, volume: VolumeId, path: &str) -> AfpCode {
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        match self
            .volumes
            .get_mut(&name)
            .and_then(|v| v.nodes.get_mut(path))
        {
            Some(node) if node.data.is_some() => {
                node.data = Some(Vec::new());
                AfpCode::Ok
            }
            Some(_) => AfpCode::AccessDenied,
            None => AfpCode::NotFound,
        }
    }

    fn mkdir(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode {
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        let vol = self.volumes.get_mut(&name).expect("attached volume gone");
        if vol.nodes.contains_key(path) {
            return AfpCode::Exists;
        }
        if !vol
            .nodes
            .get(Self::parent_of(path))
            .is_some_and(|n| n.data.is_none())
        {
            return AfpCode::NotFound;
        }
        let mut node = FakeNode::dir();
        node.mode = mode;
        vol.nodes.insert(path.to_string(), node);
        AfpCode::Ok
    }

    fn unlink(&mut self, volume: VolumeId, path: &str) -> AfpCode {
        self.unlink_calls += 1;
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        let vol = self.volumes.get_mut(&name).expect("attached volume gone");
        match vol.nodes.get(path) {
            Some(node) if node.data.is_some() => {
                vol.nodes.remove(path);
                AfpCode::Ok
            }
            Some(_) => AfpCode::AccessDenied,
            None => AfpCode::NotFound,
        }
    }

    fn rmdir(&mut self, volume: VolumeId, path: &str) -> AfpCode {
        self.rmdir_calls += 1;
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        let vol = self.volumes.get_mut(&name).expect("attached volume gone");
        match vol.nodes.get(path) {
            Some(node) if node.data.is_none() => {
                if !Self::children_of(vol, path).is_empty() {
                    return AfpCode::AccessDenied;
                }
                vol.nodes.remove(path);
                AfpCode::Ok
            }
            Some(_) => AfpCode::AccessDenied,
            None => AfpCode::NotFound,
        }
    }

    fn rename(&mut self, volume: VolumeId, from: &str, to: &str) -> AfpCode {
        self.rename_calls += 1;
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        let vol = self.volumes.get_mut(&name).expect("attached volume gone");
        if !vol.nodes.contains_key(from) {
            return AfpCode::NotFound;
        }
        let moved: Vec<(String, FakeNode)> = vol
            .nodes
            .iter()
            .filter(|(k, _)| k.as_str() == from || k.starts_with(&format!("{from}/")))
            .map(|(k, v)| (k.replacen(from, to, 1), v.clone()))
            .collect();
        vol.nodes
            .retain(|k, _| k != from && !k.starts_with(&format!("{from}/")));
        vol.nodes.extend(moved);
        AfpCode::Ok
    }

    fn chmod(&mut self, volume: VolumeId, path: &str, mode: u32) -> AfpCode {
        if self.chmod_fails {
            return AfpCode::AccessDenied;
        }
        if let Some(code) = self.injected() {
            return code;
        }
        let Some(name) = self.volume_name(volume) else {
            return AfpCode::NotAttached;
        };
        match self
            .volumes
            .get_mut(&name)
            .and_then(|v| v.nodes.get_mut(path))
        {
            Some(node) => {
                node.mode = mode;
                AfpCode::Ok
            }
            None => AfpCode::NotFound,
        }
    }

    fn statfs(&mut self, volume: VolumeId) -> (AfpCode, Option<FsStats>) {
        if let Some(code) = self.injected() {
            return (code, None);
        }
        if self.volume_name(volume).is_none() {
            return (AfpCode::NotAttached, None);
        }
        (AfpCode::Ok, Some(self.fs_stats))
    }
}

/// Credential cache fake.
#[derive(Default)]
pub struct FakeStore {
    pub entries: HashMap<(String, Option<u16>), (String, String)>,
    pub persisted: Vec<(String, String, String)>,
}

impl CredentialStore for FakeStore {
    fn lookup(&mut self, server: &str, port: Option<u16>) -> Option<(String, String)> {
        self.entries.get(&(server.to_string(), port)).cloned()
    }

    fn persist(&mut self, server: &str, _port: Option<u16>, username: &str, password: &str) {
        self.persisted
            .push((server.to_string(), username.to_string(), password.to_string()));
    }
}

/// Prompt fake; an exhausted script means the user cancelled.
#[derive(Default)]
pub struct FakePrompt {
    pub replies: VecDeque<Option<PromptReply>>,
    pub seen_messages: Vec<String>,
}

impl CredentialPrompt for FakePrompt {
    fn prompt(&mut self, _server: &str, _username: &str, message: &str) -> Option<PromptReply> {
        self.seen_messages.push(message.to_string());
        self.replies.pop_front().unwrap_or(None)
    }
}
