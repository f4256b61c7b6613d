use anyhow::{Context, Result};
use clap::Parser;
use compress_offload::{
    backend::parse_codec,
    codec::{codec_name, PcmFormat, SND_AUDIOCODEC_PCM},
    formats::wave::{WaveHeader, WAVE_HEADER_SIZE},
    logging::init_logging,
    Codec, Compress, CompressOps, Config, StreamConfig, COMPRESS_IN,
};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigint(_signal: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

#[derive(Parser)]
#[command(name = "crecord")]
#[command(about = "Capture audio from an ALSA compress offload device")]
struct Args {
    /// Card number
    #[arg(short, long, default_value_t = 0)]
    card: u32,

    /// Device number
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Device name instead of card/device, e.g. "hw:0,2" or "<plugin>:<data>"
    #[arg(short = 'D', long)]
    name: Option<String>,

    /// Buffer size in bytes, split across the fragments (0 = driver default)
    #[arg(short, long, default_value_t = 0)]
    buffer_size: u64,

    /// Number of fragments (0 = driver default)
    #[arg(short, long, default_value_t = 0)]
    fragments: u32,

    /// Capture length in seconds (0 = until interrupted)
    #[arg(short, long, default_value_t = 0)]
    length: u32,

    /// Sample rate
    #[arg(short = 'R', long, default_value_t = 44100)]
    rate: u32,

    /// Channel count
    #[arg(short = 'C', long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=32))]
    channels: u16,

    /// Sample format (U8, S16_LE, S24_LE, S24_3LE, S32_LE)
    #[arg(short = 'F', long, default_value = "S16_LE", value_parser = parse_format)]
    format: PcmFormat,

    /// Codec name or id in decimal/hex
    #[arg(short = 'I', long, default_value = "PCM", value_parser = parse_codec_arg)]
    codec: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output file, stdout when omitted
    file: Option<PathBuf>,
}

fn parse_codec_arg(s: &str) -> std::result::Result<u32, String> {
    parse_codec(s).map_err(|e| e.to_string())
}

fn parse_format(s: &str) -> std::result::Result<PcmFormat, String> {
    s.parse().map_err(|e: compress_offload::Error| e.to_string())
}

enum Output {
    File { file: File, header: Option<WaveHeader> },
    Stdout(std::io::Stdout),
}

impl Output {
    fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            Output::File { file, .. } => file.write_all(data),
            Output::Stdout(out) => out.write_all(data),
        }
    }

    /// Patch the final data size into the header, if there is one
    fn finish(self, total: u64) -> Result<()> {
        match self {
            Output::File { mut file, header: Some(mut header) } => {
                let size = u32::try_from(total).unwrap_or(u32::MAX);
                header.set_data_size(size);
                file.seek(SeekFrom::Start(0))?;
                file.write_all(&header.to_bytes())?;
                file.flush()?;
            }
            Output::File { mut file, header: None } => file.flush()?,
            Output::Stdout(mut out) => out.flush()?,
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("crecord: using default settings: {e:#}");
        Config::default()
    });

    if let Err(e) = init_logging(args.verbose, config.logging.directory.as_deref(), "crecord") {
        eprintln!("crecord: logging disabled: {e:#}");
    }

    // SAFETY: the handler only stores to an atomic
    let previous = unsafe { libc::signal(libc::SIGINT, on_sigint as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        warn!("unable to install SIGINT handler");
    }

    match record(&args, &config) {
        Ok(total) => {
            eprintln!("Finish capturing... Close Normally ({total} bytes)");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("crecord: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn open_output(args: &Args) -> Result<Output> {
    let Some(path) = &args.file else {
        return Ok(Output::Stdout(std::io::stdout()));
    };

    let mut file = File::create(path)
        .with_context(|| format!("Unable to create file '{}'", path.display()))?;

    let header = if args.codec == SND_AUDIOCODEC_PCM {
        let header = WaveHeader::new(args.channels, args.rate, args.format.physical_bits());
        // placeholder until the final size is known
        file.write_all(&header.to_bytes())
            .context("Unable to write header")?;
        debug!("wrote {} byte wave header", WAVE_HEADER_SIZE);
        Some(header)
    } else {
        None
    };

    Ok(Output::File { file, header })
}

fn open_stream(args: &Args, config: &Config, stream_config: &StreamConfig) -> Result<Compress> {
    let options = config.stream_options();
    let opened = match &args.name {
        Some(name) => {
            Compress::open_by_name(name, COMPRESS_IN, stream_config, options, &config.plugin_dir())
        }
        None => Compress::open(args.card, args.device, COMPRESS_IN, stream_config, options),
    };

    opened.with_context(|| match &args.name {
        Some(name) => format!("Unable to open Compress device {name}"),
        None => format!("Unable to open Compress device {}:{}", args.card, args.device),
    })
}

fn record(args: &Args, config: &Config) -> Result<u64> {
    let mut codec = Codec::new(args.codec)
        .with_channels(u32::from(args.channels))
        .with_sample_rate(args.rate);
    codec.format = args.format.value();

    let stream_config = if args.buffer_size != 0 && args.fragments != 0 {
        let fragment_size = u32::try_from(args.buffer_size / u64::from(args.fragments))
            .context("buffer size too large")?;
        StreamConfig::new(fragment_size, args.fragments, codec)
    } else {
        StreamConfig::new(0, 0, codec)
    };

    let bytes_per_frame = u64::from(args.format.physical_bits() / 8) * u64::from(args.channels);
    let length = u64::from(args.length) * u64::from(args.rate) * bytes_per_frame;

    let mut output = open_output(args)?;
    let mut stream = open_stream(args, config, &stream_config)?;
    let buffer = stream.config();

    if args.file.is_some() {
        println!(
            "Recording file {} On Card {} device {}, with buffer of {} bytes",
            args.file.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            args.card,
            args.device,
            buffer.buffer_bytes()
        );
        println!(
            "Codec {} Format {} Channels {}, {} Hz",
            codec_name(codec.id).unwrap_or("unknown"),
            args.format.name(),
            args.channels,
            args.rate
        );
    }

    stream
        .start()
        .with_context(|| format!("Unable to start: {}", stream.last_error()))?;

    let mut chunk = vec![0u8; buffer.fragment_size as usize];
    let mut total: u64 = 0;

    while !STOP.load(Ordering::SeqCst) && (length == 0 || total < length) {
        let want = if length == 0 {
            chunk.len()
        } else {
            chunk.len().min((length - total) as usize)
        };

        let read = match stream.read(&mut chunk[..want]) {
            Ok(read) => read,
            // interrupted poll while stopping
            Err(_) if STOP.load(Ordering::SeqCst) => break,
            Err(e) => {
                return Err(e).with_context(|| format!("Error reading sample: {}", stream.last_error()));
            }
        };

        if read == 0 {
            // non-blocking stream with nothing ready, or the device stopped
            if !stream.is_running() {
                break;
            }
            continue;
        }

        output
            .write_all(&chunk[..read])
            .context("Unable to write to output")?;
        total += read as u64;

        if args.verbose {
            match stream.get_position() {
                Ok(position) => eprintln!(
                    "DSP captured {}.{:09}",
                    position.tstamp.as_secs(),
                    position.tstamp.subsec_nanos()
                ),
                Err(e) => debug!("no timestamp: {e}"),
            }
        }
    }

    info!("captured {} bytes", total);

    if let Err(e) = stream.stop() {
        warn!("stop: {e}");
    }
    stream.close()?;
    output.finish(total)?;

    Ok(total)
}
