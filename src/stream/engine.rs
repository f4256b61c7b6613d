//! Hardware stream engine
//!
//! Drives a compress node through its lifecycle and moves data with a
//! flow-controlled loop: availability is re-read before every chunk, and the
//! loop only sleeps in poll() when less than a fragment (and less than what
//! is left to move) is available.

use super::{
    frames_to_duration, CompressOps, GaplessState, Position, StreamConfig, StreamOptions,
    StreamState, WaitPolicy,
};
use crate::codec::Codec;
use crate::device::abi::{
    protocol_parts, PROTOCOL_AVAIL64, PROTOCOL_GAPLESS, SNDRV_COMPRESS_ENCODER_DELAY,
    SNDRV_COMPRESS_ENCODER_PADDING,
};
use crate::device::{
    Availability, BufferConfig, Capabilities, Command, Direction, GaplessMetadata, NodeDevice,
    RawDevice, Task, TaskStatus, WaitFor, WaitOutcome,
};
use crate::error::{bounded, Error, Result};
use nix::errno::Errno;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A stream on a compress device node
pub struct HwStream<D: RawDevice = NodeDevice> {
    device: Option<D>,
    name: String,
    direction: Direction,
    config: BufferConfig,
    codec: Codec,
    version: u32,
    state: StreamState,
    gapless: GaplessState,
    options: StreamOptions,
    error: String,
}

impl HwStream<NodeDevice> {
    /// Open `/dev/snd/comprC<card>D<device>` and commit the configuration
    pub fn open(
        card: u32,
        device: u32,
        flags: u32,
        config: &StreamConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        let direction = Direction::from_flags(flags)?;
        let node = NodeDevice::open(card, device, direction)?;
        Self::from_device(node, format!("hw:{card},{device}"), direction, config, options)
    }
}

impl<D: RawDevice> HwStream<D> {
    /// Take ownership of an already opened device and commit the configuration
    ///
    /// On failure the device is dropped, which releases the descriptor.
    pub fn from_device(
        device: D,
        name: impl Into<String>,
        direction: Direction,
        config: &StreamConfig,
        options: StreamOptions,
    ) -> Result<Self> {
        let mut stream = Self {
            device: Some(device),
            name: name.into(),
            direction,
            config: config.buffer,
            codec: config.codec,
            version: 0,
            state: StreamState::Opening,
            gapless: GaplessState::Idle,
            options,
            error: String::new(),
        };
        stream.commit()?;

        let (major, minor, sub) = protocol_parts(stream.version);
        info!(
            "{}: opened for {:?}, protocol {}.{}.{}, {} x {} bytes",
            stream.name,
            direction,
            major,
            minor,
            sub,
            stream.config.fragments,
            stream.config.fragment_size
        );
        Ok(stream)
    }

    fn commit(&mut self) -> Result<()> {
        let device = live(&mut self.device)?;

        self.version = device
            .protocol_version()
            .map_err(|errno| Error::io("cannot read protocol version", errno))?;

        let caps = Capabilities::query(device, &self.name)?;
        let buffer = caps.fill_defaults(self.config);
        if buffer.is_unset() {
            return Err(Error::InvalidArgument(format!(
                "{}: no usable buffer layout, device reports {} x {} bytes",
                self.name, buffer.fragments, buffer.fragment_size
            )));
        }
        if self.options.validate_caps {
            caps.validate(buffer, &self.codec, self.direction)?;
        }

        device
            .set_params(buffer, &self.codec)
            .map_err(|errno| Error::io("cannot set device params", errno))?;

        self.config = buffer;
        self.set_state(StreamState::Ready);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn protocol_version(&self) -> u32 {
        self.version
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn gapless_state(&self) -> GaplessState {
        self.gapless
    }

    pub fn set_wait_policy(&mut self, policy: WaitPolicy) {
        self.options.wait_policy = policy;
    }

    fn set_state(&mut self, state: StreamState) {
        if self.state != state {
            debug!("{}: {:?} -> {:?}", self.name, self.state, state);
            self.state = state;
        }
    }

    /// Run `op`, keeping its error text on the handle if it fails
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if let Err(err) = &result {
            self.error = bounded(err.to_string());
            warn!("{}: {}", self.name, err);
        }
        result
    }

    fn require_version(&self, minimum: u32, what: &'static str) -> Result<()> {
        if self.version < minimum {
            let (major, minor, sub) = protocol_parts(self.version);
            return Err(Error::Unsupported {
                what,
                major,
                minor,
                sub,
            });
        }
        Ok(())
    }

    fn require_state(&self, allowed: &[StreamState], what: &str) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(Error::NotReady(format!(
                "cannot {what} in state {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn require_direction(&self, expected: Direction, what: &str) -> Result<()> {
        if self.direction != expected {
            return Err(Error::InvalidArgument(format!(
                "{what} on a {:?} stream",
                self.direction
            )));
        }
        Ok(())
    }

    fn transition(
        &mut self,
        command: Command,
        allowed: &[StreamState],
        to: StreamState,
    ) -> Result<()> {
        let what = command_name(command);
        self.require_state(allowed, what)?;
        live(&mut self.device)?
            .command(command)
            .map_err(|errno| Error::io(format!("cannot {what}"), errno))?;
        self.set_state(to);
        Ok(())
    }

    fn query_avail(&mut self) -> Result<Availability> {
        let use_64 = self.version >= PROTOCOL_AVAIL64;
        let device = live(&mut self.device)?;
        let result = if use_64 {
            device.avail64()
        } else {
            device.avail()
        };
        result.map_err(|errno| Error::io("cannot get avail", errno))
    }

    /// The flow-controlled loop shared by write and read
    ///
    /// `op` moves up to `len` bytes starting at `offset` and reports how many
    /// it actually moved.
    fn transfer<F>(&mut self, len: usize, ready: WaitFor, mut op: F) -> Result<usize>
    where
        F: FnMut(&mut D, usize, usize) -> std::result::Result<usize, Errno>,
    {
        let what = match ready {
            WaitFor::Readable => "read",
            _ => "write",
        };
        let fragment_size = u64::from(self.config.fragment_size);
        let options = self.options;
        let mut total = 0usize;
        let mut waited = false;

        while total < len {
            let remaining = len - total;
            let avail = self.query_avail()?.avail;
            let device = live(&mut self.device)?;

            if avail < fragment_size && avail < remaining as u64 {
                if options.nonblocking {
                    break;
                }

                let first_wait = !waited;
                waited = true;
                match device.wait(ready, options.max_poll_wait) {
                    Ok(WaitOutcome::Ready) => continue,
                    Ok(WaitOutcome::TimedOut) => {
                        debug!("{}: poll timed out after {} bytes", self.name, total);
                        if options.wait_policy == WaitPolicy::Strict && first_wait && total == 0 {
                            return Err(Error::Timeout);
                        }
                        break;
                    }
                    Ok(WaitOutcome::PollError) => {
                        return Err(Error::io("poll returned error", Errno::EIO));
                    }
                    // paused underneath us
                    Err(Errno::EBADFD) => break,
                    Err(errno) => return Err(Error::io("poll error", errno)),
                }
            }

            let chunk = usize::try_from(avail).unwrap_or(usize::MAX).min(remaining);
            match op(device, total, chunk) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(Errno::EBADFD) => break,
                Err(errno) => {
                    let err = Error::io(format!("{what} failed"), errno);
                    if total == 0 {
                        return Err(err);
                    }
                    warn!("{}: {} after {} bytes", self.name, err, total);
                    self.error = bounded(err.to_string());
                    break;
                }
            }
        }

        Ok(total)
    }

    fn ensure_accel(&self) -> Result<()> {
        self.require_direction(Direction::Accel, "task operation")
    }
}

/// The open device, or `NotReady` once the handle has been closed
fn live<D>(device: &mut Option<D>) -> Result<&mut D> {
    device
        .as_mut()
        .ok_or_else(|| Error::NotReady("device is closed".to_string()))
}

fn command_name(command: Command) -> &'static str {
    match command {
        Command::Start => "start",
        Command::Stop => "stop",
        Command::Pause => "pause",
        Command::Resume => "resume",
        Command::Drain => "drain",
        Command::NextTrack => "signal next track",
        Command::PartialDrain => "partial drain",
    }
}

impl<D: RawDevice> CompressOps for HwStream<D> {
    fn close(&mut self) -> Result<()> {
        if self.device.take().is_some() {
            info!("{}: closed", self.name);
        }
        self.gapless = GaplessState::Idle;
        self.set_state(StreamState::Closed);
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.guarded(|s| {
            live(&mut s.device)?;
            s.require_direction(Direction::Playback, "write")?;
            s.transfer(buf.len(), WaitFor::Writable, |device, offset, len| {
                device.write(&buf[offset..offset + len])
            })
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.guarded(|s| {
            live(&mut s.device)?;
            s.require_direction(Direction::Capture, "read")?;
            s.transfer(buf.len(), WaitFor::Readable, |device, offset, len| {
                device.read(&mut buf[offset..offset + len])
            })
        })
    }

    fn start(&mut self) -> Result<()> {
        self.guarded(|s| s.transition(Command::Start, &[StreamState::Ready], StreamState::Running))
    }

    fn stop(&mut self) -> Result<()> {
        self.guarded(|s| {
            s.transition(
                Command::Stop,
                &[StreamState::Running, StreamState::Paused],
                StreamState::Ready,
            )?;
            s.gapless = GaplessState::Idle;
            Ok(())
        })
    }

    fn pause(&mut self) -> Result<()> {
        self.guarded(|s| s.transition(Command::Pause, &[StreamState::Running], StreamState::Paused))
    }

    fn resume(&mut self) -> Result<()> {
        self.guarded(|s| s.transition(Command::Resume, &[StreamState::Paused], StreamState::Running))
    }

    fn drain(&mut self) -> Result<()> {
        self.guarded(|s| {
            s.require_state(&[StreamState::Running], "drain")?;
            s.set_state(StreamState::Draining);
            let result = live(&mut s.device)?.command(Command::Drain);
            match result {
                Ok(()) => {
                    s.gapless = GaplessState::Idle;
                    s.set_state(StreamState::Ready);
                    Ok(())
                }
                Err(errno) => {
                    s.set_state(StreamState::Running);
                    Err(Error::io("cannot drain the stream", errno))
                }
            }
        })
    }

    fn partial_drain(&mut self) -> Result<()> {
        self.guarded(|s| {
            s.require_state(&[StreamState::Running], "partial drain")?;
            let after = s.gapless.partial_drain()?;

            s.set_state(StreamState::Draining);
            let result = live(&mut s.device)?.command(Command::PartialDrain);
            s.set_state(StreamState::Running);
            result.map_err(|errno| Error::io("cannot drain the stream", errno))?;

            s.gapless = after;
            Ok(())
        })
    }

    fn next_track(&mut self) -> Result<()> {
        self.guarded(|s| {
            s.require_state(&[StreamState::Running], "signal next track")?;
            let armed = s.gapless.next_track()?;
            live(&mut s.device)?
                .command(Command::NextTrack)
                .map_err(|errno| Error::io("cannot set next track", errno))?;
            s.gapless = armed;
            debug!("{}: next track armed", s.name);
            Ok(())
        })
    }

    fn set_gapless_metadata(&mut self, metadata: &GaplessMetadata) -> Result<()> {
        self.guarded(|s| {
            s.require_state(
                &[StreamState::Ready, StreamState::Running, StreamState::Paused],
                "set gapless metadata",
            )?;
            s.require_version(PROTOCOL_GAPLESS, "gapless metadata")?;

            let device = live(&mut s.device)?;
            device
                .set_metadata(SNDRV_COMPRESS_ENCODER_PADDING, metadata.encoder_padding)
                .map_err(|errno| Error::io("can't set metadata for stream", errno))?;
            device
                .set_metadata(SNDRV_COMPRESS_ENCODER_DELAY, metadata.encoder_delay)
                .map_err(|errno| Error::io("can't set metadata for stream", errno))?;

            s.gapless = s.gapless.on_metadata();
            debug!(
                "{}: gapless metadata delay {} padding {}",
                s.name, metadata.encoder_delay, metadata.encoder_padding
            );
            Ok(())
        })
    }

    fn set_codec_params(&mut self, codec: &Codec) -> Result<()> {
        self.guarded(|s| {
            live(&mut s.device)?;
            s.gapless.check_codec_change()?;
            let buffer = s.config;
            live(&mut s.device)?
                .set_params(buffer, codec)
                .map_err(|errno| Error::io("cannot set device params", errno))?;
            s.codec = *codec;
            Ok(())
        })
    }

    fn get_position(&mut self) -> Result<Position> {
        self.guarded(|s| {
            let availability = s.query_avail()?;
            let rate = availability.tstamp.sampling_rate;
            if rate == 0 {
                return Err(Error::NoTimestampData);
            }
            Ok(Position {
                avail: availability.avail,
                tstamp: frames_to_duration(availability.tstamp.pcm_io_frames, rate),
            })
        })
    }

    fn get_tstamp(&mut self) -> Result<(u32, u32)> {
        self.guarded(|s| {
            let tstamp = live(&mut s.device)?
                .tstamp()
                .map_err(|errno| Error::io("cannot get tstamp", errno))?;
            Ok((tstamp.pcm_io_frames as u32, tstamp.sampling_rate))
        })
    }

    fn get_tstamp64(&mut self) -> Result<(u64, u32)> {
        self.guarded(|s| {
            live(&mut s.device)?;
            s.require_version(PROTOCOL_AVAIL64, "64-bit timestamps")?;
            let tstamp = live(&mut s.device)?
                .tstamp64()
                .map_err(|errno| Error::io("cannot get tstamp64", errno))?;
            Ok((tstamp.pcm_io_frames, tstamp.sampling_rate))
        })
    }

    fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.guarded(|s| {
            let outcome = live(&mut s.device)?
                .wait(WaitFor::Either, timeout)
                .map_err(|errno| Error::io("poll error", errno))?;
            match outcome {
                WaitOutcome::Ready => Ok(()),
                WaitOutcome::TimedOut => Err(Error::Timeout),
                WaitOutcome::PollError => Err(Error::io("poll returned error", Errno::EIO)),
            }
        })
    }

    fn set_nonblock(&mut self, nonblock: bool) {
        self.options.nonblocking = nonblock;
    }

    fn set_max_poll_wait(&mut self, wait: Option<Duration>) {
        self.options.max_poll_wait = wait;
    }

    fn is_running(&self) -> bool {
        self.state == StreamState::Running
    }

    fn is_ready(&self) -> bool {
        self.device.is_some() && self.state != StreamState::Closed
    }

    fn last_error(&self) -> &str {
        &self.error
    }

    fn config(&self) -> BufferConfig {
        self.config
    }

    fn task_create(&mut self, task: &mut Task) -> Result<()> {
        self.guarded(|s| {
            s.ensure_accel()?;
            live(&mut s.device)?
                .task_create(task)
                .map_err(|errno| Error::io("cannot create task", errno))?;
            debug!("{}: created task {}", s.name, task.seqno);
            Ok(())
        })
    }

    fn task_start(&mut self, task: &mut Task) -> Result<()> {
        self.guarded(|s| {
            s.ensure_accel()?;
            live(&mut s.device)?
                .task_start(task)
                .map_err(|errno| Error::io("cannot start task", errno))
        })
    }

    fn task_stop(&mut self, task: &Task) -> Result<()> {
        self.guarded(|s| {
            s.ensure_accel()?;
            live(&mut s.device)?
                .task_stop(task.seqno)
                .map_err(|errno| Error::io("cannot stop task", errno))
        })
    }

    fn task_free(&mut self, task: &Task) -> Result<()> {
        self.guarded(|s| {
            s.ensure_accel()?;
            live(&mut s.device)?
                .task_free(task.seqno)
                .map_err(|errno| Error::io("cannot free task", errno))
        })
    }

    fn task_status(&mut self, seqno: u64) -> Result<TaskStatus> {
        self.guarded(|s| {
            s.ensure_accel()?;
            live(&mut s.device)?
                .task_status(seqno)
                .map_err(|errno| Error::io("cannot get task status", errno))
        })
    }
}

impl<D: RawDevice> Drop for HwStream<D> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<D: RawDevice> std::fmt::Debug for HwStream<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HwStream")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("config", &self.config)
            .finish()
    }
}
