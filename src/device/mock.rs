// Scripted stand-in for a compress node, used by the unit tests
// Every call is logged so tests can assert exactly what reached the "device"

use super::abi::{self, snd_compr_caps, MAX_NUM_CODECS};
use super::{
    Availability, BufferConfig, Command, RawDevice, RawTimestamp, Task, TaskState, TaskStatus,
    WaitFor, WaitOutcome,
};
use crate::codec::{Codec, SND_AUDIOCODEC_MP3, SND_AUDIOCODEC_PCM};
use nix::errno::Errno;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Version,
    Caps,
    SetParams(BufferConfig, u32),
    SetMetadata(u32, u32),
    Avail,
    Avail64,
    Tstamp,
    Tstamp64,
    Command(Command),
    Write(usize),
    Read(usize),
    Wait(WaitFor),
    TaskCreate,
    TaskStart(u64),
    TaskStop(u64),
    TaskFree(u64),
    TaskStatus(u64),
}

impl Call {
    pub fn is_ioctl(&self) -> bool {
        !matches!(self, Call::Write(_) | Call::Read(_) | Call::Wait(_))
    }
}

#[derive(Debug)]
pub struct MockDevice {
    pub version: u32,
    pub caps: snd_compr_caps,
    pub fail_caps: Option<Errno>,
    pub fail_set_params: Option<Errno>,
    pub fail_command: Option<(Command, Errno)>,
    /// Popped per availability query; `default_avail` once empty
    pub avail_script: VecDeque<Result<u64, Errno>>,
    pub default_avail: u64,
    /// Popped per poll; `Ready` once empty
    pub wait_script: VecDeque<Result<WaitOutcome, Errno>>,
    /// Popped per write/read; `Ok(n)` caps the chunk at n bytes, empty accepts it whole
    pub transfer_script: VecDeque<Result<usize, Errno>>,
    pub tstamp: RawTimestamp,
    pub calls: Vec<Call>,
    pub written: Vec<u8>,
    next_seqno: u64,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::with_caps(4096, 65536, 2, 4)
    }

    pub fn with_caps(
        min_fragment_size: u32,
        max_fragment_size: u32,
        min_fragments: u32,
        max_fragments: u32,
    ) -> Self {
        let mut codecs = [0u32; MAX_NUM_CODECS];
        codecs[0] = SND_AUDIOCODEC_MP3;
        codecs[1] = SND_AUDIOCODEC_PCM;

        Self {
            version: abi::protocol_version(0, 4, 0),
            caps: snd_compr_caps {
                num_codecs: 2,
                direction: abi::SND_COMPRESS_PLAYBACK,
                min_fragment_size,
                max_fragment_size,
                min_fragments,
                max_fragments,
                codecs,
                reserved: [0; 11],
            },
            fail_caps: None,
            fail_set_params: None,
            fail_command: None,
            avail_script: VecDeque::new(),
            default_avail: u64::from(max_fragment_size) * u64::from(max_fragments),
            wait_script: VecDeque::new(),
            transfer_script: VecDeque::new(),
            tstamp: RawTimestamp {
                sampling_rate: 48000,
                ..Default::default()
            },
            calls: Vec::new(),
            written: Vec::new(),
            next_seqno: 1,
        }
    }

    pub fn script_avail(&mut self, values: &[u64]) {
        self.avail_script.extend(values.iter().map(|v| Ok(*v)));
    }

    pub fn ioctl_count(&self) -> usize {
        self.calls.iter().filter(|c| c.is_ioctl()).count()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    fn next_avail(&mut self) -> Result<Availability, Errno> {
        let avail = self.avail_script.pop_front().unwrap_or(Ok(self.default_avail))?;
        Ok(Availability {
            avail,
            tstamp: self.tstamp,
        })
    }

    fn next_chunk(&mut self, len: usize) -> Result<usize, Errno> {
        match self.transfer_script.pop_front() {
            Some(Ok(limit)) => Ok(len.min(limit)),
            Some(Err(errno)) => Err(errno),
            None => Ok(len),
        }
    }
}

impl RawDevice for MockDevice {
    fn protocol_version(&mut self) -> Result<u32, Errno> {
        self.calls.push(Call::Version);
        Ok(self.version)
    }

    fn get_caps(&mut self) -> Result<snd_compr_caps, Errno> {
        self.calls.push(Call::Caps);
        match self.fail_caps {
            Some(errno) => Err(errno),
            None => Ok(self.caps),
        }
    }

    fn set_params(&mut self, buffer: BufferConfig, codec: &Codec) -> Result<(), Errno> {
        self.calls.push(Call::SetParams(buffer, codec.id));
        match self.fail_set_params {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }

    fn set_metadata(&mut self, key: u32, value: u32) -> Result<(), Errno> {
        self.calls.push(Call::SetMetadata(key, value));
        Ok(())
    }

    fn avail(&mut self) -> Result<Availability, Errno> {
        self.calls.push(Call::Avail);
        self.next_avail()
    }

    fn avail64(&mut self) -> Result<Availability, Errno> {
        self.calls.push(Call::Avail64);
        self.next_avail()
    }

    fn tstamp(&mut self) -> Result<RawTimestamp, Errno> {
        self.calls.push(Call::Tstamp);
        Ok(self.tstamp)
    }

    fn tstamp64(&mut self) -> Result<RawTimestamp, Errno> {
        self.calls.push(Call::Tstamp64);
        Ok(self.tstamp)
    }

    fn command(&mut self, command: Command) -> Result<(), Errno> {
        self.calls.push(Call::Command(command));
        match self.fail_command {
            Some((failing, errno)) if failing == command => Err(errno),
            _ => Ok(()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, Errno> {
        self.calls.push(Call::Write(buf.len()));
        let n = self.next_chunk(buf.len())?;
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Errno> {
        self.calls.push(Call::Read(buf.len()));
        let n = self.next_chunk(buf.len())?;
        buf[..n].fill(0xA5);
        Ok(n)
    }

    fn wait(&mut self, what: WaitFor, _timeout: Option<Duration>) -> Result<WaitOutcome, Errno> {
        self.calls.push(Call::Wait(what));
        self.wait_script.pop_front().unwrap_or(Ok(WaitOutcome::Ready))
    }

    fn task_create(&mut self, task: &mut Task) -> Result<(), Errno> {
        self.calls.push(Call::TaskCreate);
        task.seqno = self.next_seqno;
        self.next_seqno += 1;
        Ok(())
    }

    fn task_start(&mut self, task: &mut Task) -> Result<(), Errno> {
        self.calls.push(Call::TaskStart(task.seqno));
        Ok(())
    }

    fn task_stop(&mut self, seqno: u64) -> Result<(), Errno> {
        self.calls.push(Call::TaskStop(seqno));
        Ok(())
    }

    fn task_free(&mut self, seqno: u64) -> Result<(), Errno> {
        self.calls.push(Call::TaskFree(seqno));
        Ok(())
    }

    fn task_status(&mut self, seqno: u64) -> Result<TaskStatus, Errno> {
        self.calls.push(Call::TaskStatus(seqno));
        Ok(TaskStatus {
            seqno,
            input_size: 4096,
            output_size: 8192,
            output_flags: 0,
            state: TaskState::Finished,
        })
    }
}
