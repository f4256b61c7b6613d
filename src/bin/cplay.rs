use anyhow::{bail, Context, Result};
use clap::Parser;
use compress_offload::{
    backend::parse_codec,
    codec::{codec_name, SND_AUDIOCODEC_IEC61937, SND_AUDIOCODEC_MP3, SND_AUDIOPROFILE_IEC61937_SPDIF},
    formats::mp3,
    logging::init_logging,
    Codec, Compress, CompressOps, Config, GaplessMetadata, StreamConfig, COMPRESS_OUT,
};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "cplay")]
#[command(about = "Play compressed audio files through an ALSA compress offload device")]
struct Args {
    /// Card number
    #[arg(short, long, default_value_t = 0)]
    card: u32,

    /// Device number
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Device name instead of card/device, e.g. "hw:0,1" or "<plugin>:<data>"
    #[arg(short = 'D', long)]
    name: Option<String>,

    /// Buffer size in bytes, split across the fragments (0 = driver default)
    #[arg(short, long, default_value = "0", value_parser = parse_number)]
    buffer_size: u64,

    /// Number of fragments (0 = driver default)
    #[arg(short, long, default_value_t = 0)]
    fragments: u32,

    /// Codec name (MP3, IEC61937) or id in decimal/hex
    #[arg(short = 'I', long, default_value = "MP3", value_parser = parse_codec_arg)]
    codec: u32,

    /// Play the files back to back without gaps
    #[arg(short, long)]
    gapless: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}

fn parse_codec_arg(s: &str) -> std::result::Result<u32, String> {
    parse_codec(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("cplay: using default settings: {e:#}");
        Config::default()
    });

    if let Err(e) = init_logging(args.verbose, config.logging.directory.as_deref(), "cplay") {
        eprintln!("cplay: logging disabled: {e:#}");
    }

    match play(&args, &config) {
        Ok(()) => {
            eprintln!("Finish Playing.... Close Normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("cplay: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Open `path` and describe its stream, leaving the file at the start
fn codec_for(path: &Path, codec_id: u32) -> Result<(File, Codec)> {
    let mut file =
        File::open(path).with_context(|| format!("Unable to open file '{}'", path.display()))?;

    let codec = match codec_id {
        SND_AUDIOCODEC_MP3 => {
            let mut header = [0u8; 4];
            file.read_exact(&mut header)
                .context("Unable to read header")?;
            file.seek(SeekFrom::Start(0))?;

            let header = mp3::parse_header(&header)
                .with_context(|| format!("{} is not an MP3 stream", path.display()))?;
            Codec::new(SND_AUDIOCODEC_MP3)
                .with_channels(header.channels)
                .with_sample_rate(header.sample_rate)
                .with_bit_rate(header.bit_rate)
        }
        SND_AUDIOCODEC_IEC61937 => {
            // channel count isn't known up front, any is accepted
            let mut codec = Codec::new(SND_AUDIOCODEC_IEC61937).with_channels(2);
            codec.profile = SND_AUDIOPROFILE_IEC61937_SPDIF;
            codec
        }
        other => bail!("codec ID {other} is not supported"),
    };

    Ok((file, codec))
}

fn open_stream(args: &Args, config: &Config, stream_config: &StreamConfig) -> Result<Compress> {
    let options = config.stream_options();
    let opened = match &args.name {
        Some(name) => Compress::open_by_name(
            name,
            COMPRESS_OUT,
            stream_config,
            options,
            &config.plugin_dir(),
        ),
        None => Compress::open(args.card, args.device, COMPRESS_OUT, stream_config, options),
    };

    opened.with_context(|| match &args.name {
        Some(name) => format!("Unable to open Compress device {name}"),
        None => format!("Unable to open Compress device {}:{}", args.card, args.device),
    })
}

/// Keep writing until the device has taken all of `data`
fn write_all(stream: &mut Compress, mut data: &[u8]) -> Result<()> {
    while !data.is_empty() {
        let wrote = stream
            .write(data)
            .with_context(|| format!("Error playing sample: {}", stream.last_error()))?;
        if wrote == 0 {
            bail!("DSP stopped accepting data: {}", stream.last_error());
        }
        if wrote != data.len() {
            debug!("we wrote {}, DSP accepted {}", data.len(), wrote);
        }
        data = &data[wrote..];
    }
    Ok(())
}

fn stream_file(stream: &mut Compress, file: &mut File, chunk: usize, verbose: bool) -> Result<()> {
    let mut buffer = vec![0u8; chunk];
    loop {
        let num_read = file.read(&mut buffer)?;
        if num_read == 0 {
            return Ok(());
        }
        write_all(stream, &buffer[..num_read])?;

        if verbose {
            match stream.get_position() {
                Ok(position) => eprintln!(
                    "DSP played {}.{:09}",
                    position.tstamp.as_secs(),
                    position.tstamp.subsec_nanos()
                ),
                Err(e) => eprintln!("Error querying timestamp: {e}"),
            }
        }
    }
}

/// Switch the running stream over to the next file without a gap
fn switch_track(stream: &mut Compress, codec: &Codec) {
    if let Err(e) = stream.next_track() {
        warn!("compress next track set: {e}");
    }
    if let Err(e) = stream.set_gapless_metadata(&GaplessMetadata::default()) {
        warn!("set gapless metadata: {e}");
    }
    if let Err(e) = stream.set_codec_params(codec) {
        warn!("set next track codec params: {e}");
    }
    if let Err(e) = stream.partial_drain() {
        warn!("partial drain: {e}");
    }
}

fn play(args: &Args, config: &Config) -> Result<()> {
    let (first, rest) = args
        .files
        .split_first()
        .context("no file to play")?;

    let (mut file, codec) = codec_for(first, args.codec)?;

    let stream_config = if args.buffer_size != 0 && args.fragments != 0 {
        let fragment_size = u32::try_from(args.buffer_size / u64::from(args.fragments))
            .context("buffer size too large")?;
        StreamConfig::new(fragment_size, args.fragments, codec)
    } else {
        StreamConfig::new(0, 0, codec)
    };

    let mut stream = open_stream(args, config, &stream_config)?;
    let buffer = stream.config();
    info!(
        "opened compress device, {} fragments of {} bytes",
        buffer.fragments, buffer.fragment_size
    );

    if args.gapless {
        stream
            .set_gapless_metadata(&GaplessMetadata::default())
            .context("set gapless metadata")?;
    }

    // fill the whole ring buffer before starting
    let mut prefill = vec![0u8; buffer.buffer_bytes()];
    let num_read = read_up_to(&mut file, &mut prefill)?;
    if num_read > 0 {
        debug!("doing first buffer write of {}", num_read);
        write_all(&mut stream, &prefill[..num_read])?;
    }

    println!(
        "Playing file {} On Card {} device {}, with buffer of {} bytes",
        first.display(),
        args.card,
        args.device,
        buffer.buffer_bytes()
    );
    println!(
        "Format {} Channels {}, {} Hz, Bit Rate {}",
        codec_name(codec.id).unwrap_or("unknown"),
        codec.ch_in,
        codec.sample_rate,
        codec.bit_rate
    );

    stream
        .start()
        .with_context(|| format!("Unable to start: {}", stream.last_error()))?;

    let chunk = buffer.fragment_size as usize;
    stream_file(&mut stream, &mut file, chunk, args.verbose)?;

    for path in rest {
        let (mut file, codec) = codec_for(path, args.codec)?;
        if args.verbose {
            println!("Playing file {}", path.display());
        }
        if args.gapless {
            switch_track(&mut stream, &codec);
        }
        stream_file(&mut stream, &mut file, chunk, args.verbose)?;
    }

    if let Err(e) = stream.drain() {
        warn!("drain: {e}");
    }
    stream.close()?;
    Ok(())
}

/// Read until `buf` is full or the file ends
fn read_up_to(file: &mut File, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
