use anyhow::{bail, Context, Result};
use clap::Parser;
use compress_offload::{
    codec::{PcmFormat, SND_AUDIOCODEC_PCM},
    device::TaskState,
    formats::wave::WaveHeader,
    logging::init_logging,
    Codec, Compress, CompressOps, Config, StreamConfig, Task, TaskStatus, COMPRESS_ACCEL,
};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::os::fd::{BorrowedFd, RawFd};
use std::path::PathBuf;
use std::process::ExitCode;
use std::ptr::NonNull;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Input bytes handed to the accelerator per task run
const DMA_BUF_SIZE: usize = 4096;
/// Size of each mapped task buffer
const MAP_BUF_SIZE: usize = 512 * 1024;
/// How long one task run may take before giving up
const TASK_TIMEOUT: Duration = Duration::from_secs(5);
/// Enough to get past the chunks that precede `data` in real files
const HEADER_PROBE_SIZE: u64 = 64 * 1024;

#[derive(Parser)]
#[command(name = "caccel")]
#[command(about = "Convert a WAVE file through an ALSA compress accelerator (sample rate converter)")]
struct Args {
    /// Card number
    #[arg(short, long, default_value_t = 0)]
    card: u32,

    /// Device number
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Device name instead of card/device, e.g. "hw:1,2" or "<plugin>:<data>"
    #[arg(short = 'D', long)]
    name: Option<String>,

    /// Input WAVE file
    #[arg(short, long = "in-file")]
    input: PathBuf,

    /// Output WAVE file
    #[arg(short, long = "out-file")]
    output: PathBuf,

    /// Output sample rate
    #[arg(short, long = "out-rate")]
    rate: u32,

    /// Output sample format (U8, S16_LE, S24_LE, S24_3LE, S32_LE)
    #[arg(short, long = "out-format", default_value = "S16_LE", value_parser = parse_format)]
    format: PcmFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn parse_format(s: &str) -> std::result::Result<PcmFormat, String> {
    s.parse().map_err(|e: compress_offload::Error| e.to_string())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("caccel: using default settings: {e:#}");
        Config::default()
    });

    if let Err(e) = init_logging(args.verbose, config.logging.directory.as_deref(), "caccel") {
        eprintln!("caccel: logging disabled: {e:#}");
    }

    match convert_file(&args, &config) {
        Ok(total) => {
            if args.verbose {
                println!("Conversion is finished, {total} bytes written");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("caccel: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// A task buffer mapped into our address space, unmapped on drop
struct DmaBuffer {
    ptr: NonNull<c_void>,
    len: usize,
}

impl DmaBuffer {
    fn map(fd: RawFd, len: NonZeroUsize) -> Result<Self> {
        // SAFETY: the fd came from task_create and stays open until task_free,
        // which only runs after every mapping is dropped
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        // SAFETY: fresh shared mapping, no existing memory is aliased
        let ptr = unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }?;

        let mut buffer = Self {
            ptr,
            len: len.get(),
        };
        buffer.as_mut_slice().fill(0);
        Ok(buffer)
    }

    fn as_slice(&self) -> &[u8] {
        // SAFETY: `len` bytes are mapped readable for the life of self
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: `len` bytes are mapped writable and &mut self is exclusive
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().cast::<u8>(), self.len) }
    }
}

impl Drop for DmaBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap returned
        if let Err(e) = unsafe { munmap(self.ptr, self.len) } {
            warn!("munmap failed: {e}");
        }
    }
}

fn open_stream(args: &Args, config: &Config, stream_config: &StreamConfig) -> Result<Compress> {
    let options = config.stream_options();
    let opened = match &args.name {
        Some(name) => Compress::open_by_name(
            name,
            COMPRESS_ACCEL,
            stream_config,
            options,
            &config.plugin_dir(),
        ),
        None => Compress::open(args.card, args.device, COMPRESS_ACCEL, stream_config, options),
    };

    opened.with_context(|| match &args.name {
        Some(name) => format!("Unable to open Compress device {name}"),
        None => format!("Unable to open Compress device {}:{}", args.card, args.device),
    })
}

/// Read the input header and leave the file at the first sample
fn read_input(args: &Args) -> Result<(File, WaveHeader)> {
    let mut input = File::open(&args.input)
        .with_context(|| format!("Unable to open input file '{}'", args.input.display()))?;

    let mut prefix = Vec::new();
    Read::by_ref(&mut input)
        .take(HEADER_PROBE_SIZE)
        .read_to_end(&mut prefix)
        .context("Unable to read header")?;

    let (header, data_offset) = WaveHeader::parse(&prefix)
        .with_context(|| format!("Unable to parse header of '{}'", args.input.display()))?;
    input.seek(SeekFrom::Start(data_offset as u64))?;
    debug!("input samples start at byte {}", data_offset);

    Ok((input, header))
}

fn convert_file(args: &Args, config: &Config) -> Result<u64> {
    if args.rate == 0 {
        bail!("invalid output rate {}", args.rate);
    }

    let (input, in_header) = read_input(args)?;
    let in_format = PcmFormat::from_wave_bits(in_header.sample_bits)
        .with_context(|| format!("{}-bit input samples are not supported", in_header.sample_bits))?;

    let block_align = usize::from(in_header.block_align());
    if block_align == 0 || block_align > DMA_BUF_SIZE {
        bail!("input frames of {block_align} bytes don't fit the task buffer");
    }
    // whole frames only
    let chunk = (DMA_BUF_SIZE / block_align) * block_align;

    // streamed files leave the data size at 0 or all ones
    let data_limit = match in_header.data_size {
        0 | u32::MAX => u64::MAX,
        size => u64::from(size),
    };

    let mut output = File::create(&args.output)
        .with_context(|| format!("Unable to create output file '{}'", args.output.display()))?;
    let mut out_header =
        WaveHeader::new(in_header.channels, args.rate, args.format.physical_bits());
    output
        .write_all(&out_header.to_bytes())
        .context("Error writing output file header")?;

    let mut codec = Codec::new(SND_AUDIOCODEC_PCM)
        .with_channels(u32::from(in_header.channels))
        .with_sample_rate(in_header.rate);
    codec.format = in_format.value();
    codec.pcm_format = args.format.value();
    // rate converter options: output rate first
    codec.options[0] = args.rate;

    let mut stream = open_stream(args, config, &StreamConfig::new(0, 0, codec))?;
    info!(
        "converting {} Hz {} to {} Hz {}, {} channels",
        in_header.rate,
        in_format.name(),
        args.rate,
        args.format.name(),
        in_header.channels
    );

    let mut task = Task::default();
    stream
        .task_create(&mut task)
        .with_context(|| format!("Unable to create task: {}", stream.last_error()))?;

    let result = run_task(
        &mut stream,
        &mut task,
        &mut input.take(data_limit),
        &mut output,
        chunk,
        args.verbose,
    );

    if let Err(e) = stream.task_free(&task) {
        warn!("task free: {e}");
    }
    let total = result?;

    out_header.set_data_size(u32::try_from(total).unwrap_or(u32::MAX));
    output.seek(SeekFrom::Start(0))?;
    output.write_all(&out_header.to_bytes())?;
    output.flush()?;

    stream.close()?;
    Ok(total)
}

/// Feed the input through the task chunk by chunk, returning the output byte count
fn run_task(
    stream: &mut Compress,
    task: &mut Task,
    input: &mut impl Read,
    output: &mut File,
    chunk: usize,
    verbose: bool,
) -> Result<u64> {
    let map_len = NonZeroUsize::new(MAP_BUF_SIZE).context("empty task buffer")?;
    let mut in_buf = DmaBuffer::map(task.input_fd, map_len).context("Error mapping input buffer")?;
    let out_buf = DmaBuffer::map(task.output_fd, map_len).context("Error mapping output buffer")?;

    if verbose {
        println!("conversion is started");
    }

    let mut total = 0u64;
    loop {
        let read = read_up_to(input, &mut in_buf.as_mut_slice()[..chunk])?;
        if read == 0 {
            break;
        }
        task.input_size = read as u64;

        stream
            .task_start(task)
            .with_context(|| format!("Unable to start task: {}", stream.last_error()))?;
        let status = wait_for_task(stream, task.seqno)?;
        stream
            .task_stop(task)
            .with_context(|| format!("Unable to stop task: {}", stream.last_error()))?;

        let produced = usize::try_from(status.output_size)
            .unwrap_or(usize::MAX)
            .min(out_buf.len);
        output
            .write_all(&out_buf.as_slice()[..produced])
            .context("Error writing output file")?;
        total += produced as u64;
        debug!("task {}: {} bytes in, {} bytes out", task.seqno, read, produced);
    }

    Ok(total)
}

fn wait_for_task(stream: &mut Compress, seqno: u64) -> Result<TaskStatus> {
    loop {
        let status = stream
            .task_status(seqno)
            .with_context(|| format!("Unable to get task status: {}", stream.last_error()))?;
        if status.state != TaskState::Active {
            return Ok(status);
        }
        stream
            .wait(Some(TASK_TIMEOUT))
            .with_context(|| format!("task {seqno} did not finish"))?;
    }
}

/// Read until `buf` is full or the input ends
fn read_up_to(input: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
