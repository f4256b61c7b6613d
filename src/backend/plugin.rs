//! Plugin transport: compress "devices" implemented by a shared library
//!
//! A plugin named `foo` lives in `<plugin dir>/libcompress_offload_foo.so` and
//! exports a [`PluginOps`] table under [`PLUGIN_OPS_SYMBOL`]. The table starts
//! with [`PLUGIN_OPS_MAGIC`]; anything else is refused before any other entry
//! is touched. Every entry takes the opaque handle returned by `open_by_name`
//! and reports failure as a negative errno.

use crate::codec::Codec;
use crate::device::abi::{snd_codec, snd_compr_task, snd_compr_task_status};
use crate::device::{BufferConfig, GaplessMetadata, Task, TaskStatus};
use crate::error::{bounded, Error, Result};
use crate::stream::{CompressOps, Position, StreamConfig, StreamOptions};
use libloading::{Library, Symbol};
use nix::errno::Errno;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// "COP2"
pub const PLUGIN_OPS_MAGIC: u32 = 0x434f_5032;
pub const PLUGIN_OPS_SYMBOL: &[u8] = b"compress_offload_plugin_ops\0";

/// Buffer and codec handed to the plugin at open; the plugin fills zero fields
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginConfig {
    pub fragment_size: u32,
    pub fragments: u32,
    pub codec: snd_codec,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct PluginPosition {
    pub avail: u64,
    pub secs: u64,
    pub nanos: u32,
}

type Handle = *mut c_void;

/// Operations table exported by a plugin library
///
/// Entries may be null; calling a missing entry fails with `ENOSYS`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct PluginOps {
    pub magic: u32,
    pub open_by_name:
        Option<unsafe extern "C" fn(*const c_char, u32, *mut PluginConfig) -> Handle>,
    pub close: Option<unsafe extern "C" fn(Handle)>,
    pub get_position: Option<unsafe extern "C" fn(Handle, *mut PluginPosition) -> c_int>,
    pub get_tstamp: Option<unsafe extern "C" fn(Handle, *mut u64, *mut u32) -> c_int>,
    pub write: Option<unsafe extern "C" fn(Handle, *const u8, usize) -> isize>,
    pub read: Option<unsafe extern "C" fn(Handle, *mut u8, usize) -> isize>,
    pub start: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub stop: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub pause: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub resume: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub drain: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub partial_drain: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub next_track: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub set_gapless_metadata: Option<unsafe extern "C" fn(Handle, u32, u32) -> c_int>,
    pub set_codec_params: Option<unsafe extern "C" fn(Handle, *const snd_codec) -> c_int>,
    /// Milliseconds, negative waits forever
    pub set_max_poll_wait: Option<unsafe extern "C" fn(Handle, c_int)>,
    pub set_nonblock: Option<unsafe extern "C" fn(Handle, c_int)>,
    pub wait: Option<unsafe extern "C" fn(Handle, c_int) -> c_int>,
    pub is_codec_supported_by_name:
        Option<unsafe extern "C" fn(*const c_char, u32, *const snd_codec) -> c_int>,
    pub is_running: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub is_ready: Option<unsafe extern "C" fn(Handle) -> c_int>,
    pub get_error: Option<unsafe extern "C" fn(Handle) -> *const c_char>,
    pub task_create: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task) -> c_int>,
    pub task_start: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task) -> c_int>,
    pub task_stop: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task) -> c_int>,
    pub task_free: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task) -> c_int>,
    pub task_status: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task_status) -> c_int>,
}

pub fn library_path(dir: &Path, plugin: &str) -> PathBuf {
    dir.join(format!("libcompress_offload_{plugin}.so"))
}

pub fn check_magic(plugin: &str, magic: u32) -> Result<()> {
    if magic != PLUGIN_OPS_MAGIC {
        return Err(Error::IncompatiblePlugin {
            name: plugin.to_string(),
            found: magic,
            expected: PLUGIN_OPS_MAGIC,
        });
    }
    Ok(())
}

/// Copy an exported ops table, reading only its magic until that matches
///
/// # Safety
///
/// `table` must point at a readable `u32`, and at a complete [`PluginOps`]
/// whenever that `u32` equals [`PLUGIN_OPS_MAGIC`].
pub unsafe fn read_ops(plugin: &str, table: *const PluginOps) -> Result<PluginOps> {
    // the magic is the first field of the repr(C) table
    let magic = unsafe { table.cast::<u32>().read_unaligned() };
    check_magic(plugin, magic)?;
    Ok(unsafe { table.read_unaligned() })
}

/// Load `plugin` from `dir` and copy out its ops table
///
/// The library is dropped (unloaded) on every error path.
pub fn load(dir: &Path, plugin: &str) -> Result<(Library, PluginOps)> {
    let path = library_path(dir, plugin);
    let load_error = |reason: String| Error::PluginLoad {
        name: plugin.to_string(),
        reason,
    };

    // SAFETY: running the library's initialisers is the point of loading a plugin
    let library = unsafe { Library::new(&path) }
        .map_err(|e| load_error(format!("unable to open {}: {e}", path.display())))?;

    let read = {
        // SAFETY: the symbol address is only dereferenced through `read_ops`
        let symbol: Symbol<*const PluginOps> = unsafe { library.get(PLUGIN_OPS_SYMBOL) }
            .map_err(|e| load_error(format!("missing ops table: {e}")))?;
        let table = *symbol;
        if table.is_null() {
            return Err(load_error("ops table is null".to_string()));
        }
        // SAFETY: a non-null exported symbol holds at least the magic, and the
        // library stays loaded for this read
        unsafe { read_ops(plugin, table) }
    };

    let ops = match read {
        Ok(ops) => ops,
        Err(err) => {
            warn!("{}: {}", path.display(), err);
            return Err(err);
        }
    };

    debug!("loaded plugin {} from {}", plugin, path.display());
    Ok((library, ops))
}

fn ms(wait: Option<Duration>) -> c_int {
    match wait {
        Some(t) => t.as_millis().min(c_int::MAX as u128) as c_int,
        None => -1,
    }
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| Error::InvalidArgument(format!("Invalid device name {name}")))
}

/// Resolve an entry, or fail with ENOSYS if the plugin left it null
macro_rules! entry {
    ($self:ident, $field:ident) => {
        $self.ops.$field.ok_or_else(|| {
            Error::io(
                concat!("plugin does not implement ", stringify!($field)),
                Errno::ENOSYS,
            )
        })?
    };
}

/// A stream served by a plugin library
pub struct PluginStream {
    ops: PluginOps,
    handle: Handle,
    name: String,
    config: BufferConfig,
    error: String,
    // dropped last so the code behind `ops` outlives the handle
    _library: Option<Library>,
}

impl PluginStream {
    /// Load the plugin named by `name` (`<plugin>:<data>`) and open a stream on it
    pub fn open(
        plugin_dir: &Path,
        plugin: &str,
        name: &str,
        flags: u32,
        config: &StreamConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        let (library, ops) = load(plugin_dir, plugin)?;
        Self::attach(ops, Some(library), name, flags, config, options)
    }

    /// Open a stream through an already resolved ops table
    pub fn attach(
        ops: PluginOps,
        library: Option<Library>,
        name: &str,
        flags: u32,
        config: &StreamConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        check_magic(name, ops.magic)?;
        let open = ops.open_by_name.ok_or_else(|| Error::PluginLoad {
            name: name.to_string(),
            reason: "ops table has no open_by_name".to_string(),
        })?;

        let c_name = c_name(name)?;
        let mut raw = PluginConfig {
            fragment_size: config.buffer.fragment_size,
            fragments: config.buffer.fragments,
            codec: snd_codec::from(&config.codec),
        };
        // SAFETY: both pointers are valid for the duration of the call
        let handle = unsafe { open(c_name.as_ptr(), flags, &mut raw) };
        if handle.is_null() {
            return Err(Error::NoDevice {
                path: name.to_string(),
                errno: Errno::ENODEV,
            });
        }

        let mut stream = Self {
            ops,
            handle,
            name: name.to_string(),
            config: BufferConfig::new(raw.fragment_size, raw.fragments),
            error: String::new(),
            _library: library,
        };
        if stream.config.is_unset() {
            // dropping the stream closes the plugin handle
            return Err(Error::InvalidArgument(format!(
                "{name}: plugin left the buffer layout empty"
            )));
        }
        stream.set_nonblock(options.nonblocking);
        stream.set_max_poll_wait(options.max_poll_wait);

        info!(
            "{}: opened plugin stream, {} x {} bytes",
            stream.name, stream.config.fragments, stream.config.fragment_size
        );
        Ok(stream)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self) -> Result<Handle> {
        if self.handle.is_null() {
            return Err(Error::NotReady("device is closed".to_string()));
        }
        Ok(self.handle)
    }

    /// Text the plugin reports for its last failure
    fn plugin_error(&self) -> Option<String> {
        let get_error = self.ops.get_error?;
        if self.handle.is_null() {
            return None;
        }
        // SAFETY: handle is live; the plugin owns the returned string
        let text = unsafe { get_error(self.handle) };
        if text.is_null() {
            return None;
        }
        // SAFETY: non-null, NUL-terminated per the ops contract
        let text = unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned();
        (!text.is_empty()).then_some(text)
    }

    /// Turn a plugin return code into a result, keeping the error text on failure
    fn check(&mut self, what: &str, ret: i64) -> Result<u64> {
        if ret >= 0 {
            return Ok(ret as u64);
        }
        let errno = Errno::from_raw((-ret) as i32);
        let text = self
            .plugin_error()
            .unwrap_or_else(|| format!("{what} failed"));
        let err = Error::from_errno(errno, text);
        self.error = bounded(err.to_string());
        warn!("{}: {}", self.name, err);
        Err(err)
    }

    fn simple(&mut self, what: &str, op: Option<unsafe extern "C" fn(Handle) -> c_int>) -> Result<()> {
        let handle = self.handle()?;
        let op = op.ok_or_else(|| Error::io(format!("plugin does not implement {what}"), Errno::ENOSYS))?;
        // SAFETY: handle is live
        let ret = unsafe { op(handle) };
        self.check(what, i64::from(ret)).map(|_| ())
    }

    fn task_call(
        &mut self,
        what: &str,
        op: Option<unsafe extern "C" fn(Handle, *mut snd_compr_task) -> c_int>,
        task: &Task,
    ) -> Result<Task> {
        let handle = self.handle()?;
        let op = op.ok_or_else(|| Error::io(format!("plugin does not implement {what}"), Errno::ENOSYS))?;
        let mut raw = snd_compr_task::from(task);
        // SAFETY: handle is live, raw outlives the call
        let ret = unsafe { op(handle, &mut raw) };
        self.check(what, i64::from(ret))?;
        Ok(Task::from(raw))
    }
}

/// Ask a plugin whether it can handle `codec`, without opening a stream
pub fn is_codec_supported(ops: &PluginOps, name: &str, flags: u32, codec: &Codec) -> bool {
    let Some(query) = ops.is_codec_supported_by_name else {
        return false;
    };
    let Ok(c_name) = c_name(name) else {
        return false;
    };
    let raw = snd_codec::from(codec);
    // SAFETY: both pointers are valid for the duration of the call
    unsafe { query(c_name.as_ptr(), flags, &raw) != 0 }
}

impl CompressOps for PluginStream {
    fn close(&mut self) -> Result<()> {
        if !self.handle.is_null() {
            if let Some(close) = self.ops.close {
                // SAFETY: handle is live and not used after this
                unsafe { close(self.handle) };
            }
            self.handle = std::ptr::null_mut();
            info!("{}: closed", self.name);
        }
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let handle = self.handle()?;
        let write = entry!(self, write);
        // SAFETY: buf is valid for buf.len() bytes
        let ret = unsafe { write(handle, buf.as_ptr(), buf.len()) };
        self.check("write", ret as i64).map(|n| n as usize)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let handle = self.handle()?;
        let read = entry!(self, read);
        // SAFETY: buf is valid for buf.len() bytes
        let ret = unsafe { read(handle, buf.as_mut_ptr(), buf.len()) };
        self.check("read", ret as i64).map(|n| n as usize)
    }

    fn start(&mut self) -> Result<()> {
        self.simple("start", self.ops.start)
    }

    fn stop(&mut self) -> Result<()> {
        self.simple("stop", self.ops.stop)
    }

    fn pause(&mut self) -> Result<()> {
        self.simple("pause", self.ops.pause)
    }

    fn resume(&mut self) -> Result<()> {
        self.simple("resume", self.ops.resume)
    }

    fn drain(&mut self) -> Result<()> {
        self.simple("drain", self.ops.drain)
    }

    fn partial_drain(&mut self) -> Result<()> {
        self.simple("partial drain", self.ops.partial_drain)
    }

    fn next_track(&mut self) -> Result<()> {
        self.simple("next track", self.ops.next_track)
    }

    fn set_gapless_metadata(&mut self, metadata: &GaplessMetadata) -> Result<()> {
        let handle = self.handle()?;
        let set = entry!(self, set_gapless_metadata);
        // SAFETY: handle is live
        let ret = unsafe { set(handle, metadata.encoder_delay, metadata.encoder_padding) };
        self.check("set gapless metadata", i64::from(ret)).map(|_| ())
    }

    fn set_codec_params(&mut self, codec: &Codec) -> Result<()> {
        let handle = self.handle()?;
        let set = entry!(self, set_codec_params);
        let raw = snd_codec::from(codec);
        // SAFETY: handle is live, raw outlives the call
        let ret = unsafe { set(handle, &raw) };
        self.check("set codec params", i64::from(ret)).map(|_| ())
    }

    fn get_position(&mut self) -> Result<Position> {
        let handle = self.handle()?;
        let get = entry!(self, get_position);
        let mut raw = PluginPosition::default();
        // SAFETY: handle is live, raw outlives the call
        let ret = unsafe { get(handle, &mut raw) };
        self.check("get position", i64::from(ret))?;
        Ok(Position {
            avail: raw.avail,
            tstamp: Duration::new(raw.secs, raw.nanos),
        })
    }

    fn get_tstamp(&mut self) -> Result<(u32, u32)> {
        let (frames, rate) = self.get_tstamp64()?;
        Ok((frames as u32, rate))
    }

    fn get_tstamp64(&mut self) -> Result<(u64, u32)> {
        let handle = self.handle()?;
        let get = entry!(self, get_tstamp);
        let (mut frames, mut rate) = (0u64, 0u32);
        // SAFETY: handle is live, outputs outlive the call
        let ret = unsafe { get(handle, &mut frames, &mut rate) };
        self.check("get tstamp", i64::from(ret))?;
        Ok((frames, rate))
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        let handle = self.handle()?;
        let wait = entry!(self, wait);
        // SAFETY: handle is live
        let ret = unsafe { wait(handle, ms(timeout)) };
        self.check("wait", i64::from(ret)).map(|_| ())
    }

    fn set_nonblock(&mut self, nonblock: bool) {
        if let (Some(set), false) = (self.ops.set_nonblock, self.handle.is_null()) {
            // SAFETY: handle is live
            unsafe { set(self.handle, c_int::from(nonblock)) };
        }
    }

    fn set_max_poll_wait(&mut self, wait: Option<Duration>) {
        if let (Some(set), false) = (self.ops.set_max_poll_wait, self.handle.is_null()) {
            // SAFETY: handle is live
            unsafe { set(self.handle, ms(wait)) };
        }
    }

    fn is_running(&self) -> bool {
        match (self.ops.is_running, self.handle.is_null()) {
            // SAFETY: handle is live
            (Some(query), false) => unsafe { query(self.handle) != 0 },
            _ => false,
        }
    }

    fn is_ready(&self) -> bool {
        match (self.ops.is_ready, self.handle.is_null()) {
            // SAFETY: handle is live
            (Some(query), false) => unsafe { query(self.handle) != 0 },
            _ => false,
        }
    }

    fn last_error(&self) -> &str {
        &self.error
    }

    fn config(&self) -> BufferConfig {
        self.config
    }

    fn task_create(&mut self, task: &mut Task) -> Result<()> {
        *task = self.task_call("create task", self.ops.task_create, task)?;
        Ok(())
    }

    fn task_start(&mut self, task: &mut Task) -> Result<()> {
        *task = self.task_call("start task", self.ops.task_start, task)?;
        Ok(())
    }

    fn task_stop(&mut self, task: &Task) -> Result<()> {
        self.task_call("stop task", self.ops.task_stop, task).map(|_| ())
    }

    fn task_free(&mut self, task: &Task) -> Result<()> {
        self.task_call("free task", self.ops.task_free, task).map(|_| ())
    }

    fn task_status(&mut self, seqno: u64) -> Result<TaskStatus> {
        let handle = self.handle()?;
        let status = entry!(self, task_status);
        let mut raw = snd_compr_task_status {
            seqno,
            ..Default::default()
        };
        // SAFETY: handle is live, raw outlives the call
        let ret = unsafe { status(handle, &mut raw) };
        self.check("task status", i64::from(ret))?;
        Ok(TaskStatus::from(raw))
    }
}

impl Drop for PluginStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for PluginStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStream")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("open", &!self.handle.is_null())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SND_AUDIOCODEC_MP3, SND_AUDIOCODEC_PCM};
    use crate::device::COMPRESS_OUT;

    fn open_fake() -> PluginStream {
        let config = StreamConfig::new(0, 0, Codec::new(SND_AUDIOCODEC_MP3));
        PluginStream::attach(
            fake::ops(),
            None,
            "fake:stream=1",
            COMPRESS_OUT,
            &config,
            StreamOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_library_path() {
        assert_eq!(
            library_path(Path::new("/usr/lib/compress-offload"), "dsp"),
            PathBuf::from("/usr/lib/compress-offload/libcompress_offload_dsp.so")
        );
    }

    #[test]
    fn test_missing_library() {
        let dir = tempfile::tempdir().unwrap();
        match load(dir.path(), "nothing") {
            Err(Error::PluginLoad { name, reason }) => {
                assert_eq!(name, "nothing");
                assert!(reason.contains("libcompress_offload_nothing.so"));
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("loaded a library that does not exist"),
        }
    }

    #[test]
    fn test_bad_magic_is_refused() {
        let mut ops = fake::ops();
        ops.magic = 0xdead_beef;
        let config = StreamConfig::default();
        let err = PluginStream::attach(ops, None, "fake:", COMPRESS_OUT, &config, StreamOptions::default())
            .unwrap_err();
        match err {
            Error::IncompatiblePlugin { found, expected, .. } => {
                assert_eq!(found, 0xdead_beef);
                assert_eq!(expected, PLUGIN_OPS_MAGIC);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_read_ops_stops_at_wrong_magic() {
        // a lone u32 stands in for a table from some other ABI
        static SHORT_TABLE: u32 = 0x434f_5031;
        let table = std::ptr::addr_of!(SHORT_TABLE).cast::<PluginOps>();
        match unsafe { read_ops("old", table) } {
            Err(Error::IncompatiblePlugin { name, found, .. }) => {
                assert_eq!(name, "old");
                assert_eq!(found, 0x434f_5031);
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("accepted a table with the wrong magic"),
        }
    }

    #[test]
    fn test_read_ops_copies_matching_table() {
        let ops = fake::ops();
        let copied = unsafe { read_ops("fake", &ops) }.unwrap();
        assert_eq!(copied.magic, PLUGIN_OPS_MAGIC);
        assert!(copied.open_by_name.is_some());
    }

    #[test]
    fn test_open_refuses_empty_layout() {
        unsafe extern "C" fn open_empty(
            name: *const c_char,
            flags: u32,
            config: *mut PluginConfig,
        ) -> Handle {
            let open = fake::ops().open_by_name.unwrap();
            let handle = open(name, flags, config);
            (*config).fragment_size = 0;
            (*config).fragments = 0;
            handle
        }

        let mut ops = fake::ops();
        ops.open_by_name = Some(open_empty);
        let config = StreamConfig::default();
        let err = PluginStream::attach(ops, None, "fake:", COMPRESS_OUT, &config, StreamOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_open_takes_plugin_defaults() {
        let stream = open_fake();
        assert_eq!(stream.config(), BufferConfig::new(2048, 8));
        assert!(stream.is_ready());
        assert!(!stream.is_running());
    }

    #[test]
    fn test_calls_reach_plugin() {
        let mut stream = open_fake();
        stream.start().unwrap();
        assert!(stream.is_running());
        assert_eq!(stream.write(&[0u8; 4096]).unwrap(), 1000);

        let position = stream.get_position().unwrap();
        assert_eq!(position.avail, 1024);
        assert_eq!(position.tstamp, Duration::new(1, 2_562_500));
    }

    #[test]
    fn test_plugin_errors_carry_errno_and_text() {
        let mut stream = open_fake();
        match stream.next_track() {
            Err(Error::PermissionDenied(text)) => assert_eq!(text, "metadata not set"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(stream.last_error().contains("metadata not set"));

        stream
            .set_gapless_metadata(&GaplessMetadata::default())
            .unwrap();
        stream.next_track().unwrap();
    }

    #[test]
    fn test_missing_entry_is_enosys() {
        let mut stream = open_fake();
        let err = stream.drain().unwrap_err();
        assert_eq!(err.errno(), Errno::ENOSYS);
    }

    #[test]
    fn test_close_releases_handle_once() {
        let mut stream = open_fake();
        let mut closed = false;
        // SAFETY: the handle is the fake's boxed state
        unsafe { (*(stream.handle as *mut fake::FakePlugin)).closed = &mut closed };

        stream.close().unwrap();
        stream.close().unwrap();
        assert!(closed);
        assert!(!stream.is_ready());
        assert!(matches!(stream.write(&[0u8; 4]), Err(Error::NotReady(_))));
    }

    #[test]
    fn test_codec_support_query() {
        let ops = fake::ops();
        assert!(is_codec_supported(&ops, "fake:", COMPRESS_OUT, &Codec::new(SND_AUDIOCODEC_MP3)));
        assert!(!is_codec_supported(&ops, "fake:", COMPRESS_OUT, &Codec::new(SND_AUDIOCODEC_PCM)));
    }
}
