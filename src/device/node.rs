use super::abi::{self, snd_compr_avail, snd_compr_avail64, snd_compr_caps, snd_compr_params};
use super::{
    node_path, Availability, BufferConfig, Command, Direction, RawDevice, RawTimestamp, Task,
    TaskStatus, WaitFor, WaitOutcome,
};
use crate::codec::Codec;
use crate::error::{Error, Result};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A real `/dev/snd/comprC*D*` node
///
/// The descriptor is closed when this is dropped.
#[derive(Debug)]
pub struct NodeDevice {
    file: File,
    path: PathBuf,
}

impl NodeDevice {
    pub fn open(card: u32, device: u32, direction: Direction) -> Result<Self> {
        Self::open_path(node_path(card, device), direction)
    }

    pub fn open_path<P: AsRef<Path>>(path: P, direction: Direction) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        match direction {
            Direction::Playback => options.write(true),
            Direction::Capture => options.read(true),
            Direction::Accel => options.read(true).write(true),
        };

        let file = options.open(&path).map_err(|e| Error::NoDevice {
            path: path.display().to_string(),
            errno: errno_of(&e),
        })?;
        debug!("opened {} for {:?}", path.display(), direction);

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }
}

fn errno_of(err: &std::io::Error) -> Errno {
    Errno::from_raw(err.raw_os_error().unwrap_or(libc::EIO))
}

impl RawDevice for NodeDevice {
    fn protocol_version(&mut self) -> std::result::Result<u32, Errno> {
        let mut version: libc::c_int = 0;
        unsafe { abi::compr_ioctl_version(self.fd(), &mut version) }?;
        Ok(version as u32)
    }

    fn get_caps(&mut self) -> std::result::Result<snd_compr_caps, Errno> {
        let mut caps = snd_compr_caps::default();
        unsafe { abi::compr_get_caps(self.fd(), &mut caps) }?;
        Ok(caps)
    }

    fn set_params(&mut self, buffer: BufferConfig, codec: &Codec) -> std::result::Result<(), Errno> {
        let params = snd_compr_params {
            buffer: abi::snd_compressed_buffer {
                fragment_size: buffer.fragment_size,
                fragments: buffer.fragments,
            },
            codec: codec.into(),
            no_wake_mode: 0,
        };
        unsafe { abi::compr_set_params(self.fd(), &params) }?;
        Ok(())
    }

    fn set_metadata(&mut self, key: u32, value: u32) -> std::result::Result<(), Errno> {
        let metadata = abi::snd_compr_metadata {
            key,
            value: [value, 0, 0, 0, 0, 0, 0, 0],
        };
        unsafe { abi::compr_set_metadata(self.fd(), &metadata) }?;
        Ok(())
    }

    fn avail(&mut self) -> std::result::Result<Availability, Errno> {
        let mut raw = snd_compr_avail::default();
        unsafe { abi::compr_avail(self.fd(), &mut raw) }?;
        Ok(Availability {
            avail: raw.avail,
            tstamp: RawTimestamp::from(raw.tstamp),
        })
    }

    fn avail64(&mut self) -> std::result::Result<Availability, Errno> {
        let mut raw = snd_compr_avail64::default();
        unsafe { abi::compr_avail64(self.fd(), &mut raw) }?;
        Ok(Availability {
            avail: raw.avail,
            tstamp: RawTimestamp::from(raw.tstamp),
        })
    }

    fn tstamp(&mut self) -> std::result::Result<RawTimestamp, Errno> {
        let mut raw = abi::snd_compr_tstamp::default();
        unsafe { abi::compr_tstamp(self.fd(), &mut raw) }?;
        Ok(raw.into())
    }

    fn tstamp64(&mut self) -> std::result::Result<RawTimestamp, Errno> {
        let mut raw = abi::snd_compr_tstamp64::default();
        unsafe { abi::compr_tstamp64(self.fd(), &mut raw) }?;
        Ok(raw.into())
    }

    fn command(&mut self, command: Command) -> std::result::Result<(), Errno> {
        let fd = self.fd();
        unsafe {
            match command {
                Command::Start => abi::compr_start(fd),
                Command::Stop => abi::compr_stop(fd),
                Command::Pause => abi::compr_pause(fd),
                Command::Resume => abi::compr_resume(fd),
                Command::Drain => abi::compr_drain(fd),
                Command::NextTrack => abi::compr_next_track(fd),
                Command::PartialDrain => abi::compr_partial_drain(fd),
            }
        }?;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> std::result::Result<usize, Errno> {
        self.file.write(buf).map_err(|e| errno_of(&e))
    }

    fn read(&mut self, buf: &mut [u8]) -> std::result::Result<usize, Errno> {
        self.file.read(buf).map_err(|e| errno_of(&e))
    }

    fn wait(
        &mut self,
        what: WaitFor,
        timeout: Option<Duration>,
    ) -> std::result::Result<WaitOutcome, Errno> {
        let events = match what {
            WaitFor::Writable => libc::POLLOUT,
            WaitFor::Readable => libc::POLLIN,
            WaitFor::Either => libc::POLLOUT | libc::POLLIN,
        };
        let mut fds = libc::pollfd {
            fd: self.fd(),
            events,
            revents: 0,
        };
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
            None => -1,
        };

        let ret = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if ret < 0 {
            return Err(Errno::last());
        }
        if fds.revents & libc::POLLERR != 0 {
            return Ok(WaitOutcome::PollError);
        }
        if ret == 0 {
            return Ok(WaitOutcome::TimedOut);
        }
        Ok(WaitOutcome::Ready)
    }

    fn task_create(&mut self, task: &mut Task) -> std::result::Result<(), Errno> {
        let mut raw = abi::snd_compr_task::from(&*task);
        unsafe { abi::compr_task_create(self.fd(), &mut raw) }?;
        *task = Task::from(raw);
        Ok(())
    }

    fn task_start(&mut self, task: &mut Task) -> std::result::Result<(), Errno> {
        let mut raw = abi::snd_compr_task::from(&*task);
        unsafe { abi::compr_task_start(self.fd(), &mut raw) }?;
        *task = Task::from(raw);
        Ok(())
    }

    fn task_stop(&mut self, seqno: u64) -> std::result::Result<(), Errno> {
        unsafe { abi::compr_task_stop(self.fd(), &seqno) }?;
        Ok(())
    }

    fn task_free(&mut self, seqno: u64) -> std::result::Result<(), Errno> {
        unsafe { abi::compr_task_free(self.fd(), &seqno) }?;
        Ok(())
    }

    fn task_status(&mut self, seqno: u64) -> std::result::Result<TaskStatus, Errno> {
        let mut raw = abi::snd_compr_task_status {
            seqno,
            ..Default::default()
        };
        unsafe { abi::compr_task_status(self.fd(), &mut raw) }?;
        Ok(TaskStatus::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_node_reports_no_device() {
        let err = NodeDevice::open_path("/nonexistent/comprC9D9", Direction::Playback).unwrap_err();
        match err {
            Error::NoDevice { path, errno } => {
                assert_eq!(path, "/nonexistent/comprC9D9");
                assert_eq!(errno, Errno::ENOENT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_ioctl_on_regular_file_fails_cleanly() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut node = NodeDevice::open_path(file.path(), Direction::Playback).unwrap();
        assert_eq!(node.path(), file.path());
        assert!(node.protocol_version().is_err());
    }
}
