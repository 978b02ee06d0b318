//! CLI tool for showing information about storage media devices.
//!
//! This tool uses the `smdev` library to determine the geometry and media
//! information of a device and optionally dump a range of its data.

use clap::Parser;
use smdev::{DeviceHandle, Options};
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// Determine information about a storage media device.
///
/// Prints the bus type, identification, media type, size, I/O granularity
/// and optical disc layout of the device. With `--length`, also reads a
/// range of the media and writes it to stdout or to the output file.
#[derive(Parser, Debug)]
#[command(name = "smdevinfo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the source device
    source: PathBuf,

    /// Byte offset to start reading from
    #[arg(short, long, default_value = "0")]
    offset: u64,

    /// Number of bytes to read (default: nothing, "all" for the rest of the media)
    #[arg(short, long)]
    length: Option<String>,

    /// Enable verbose output to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Output file path (default: stdout)
    #[arg(short = 'O', long)]
    output: Option<PathBuf>,

    /// Zero-fill unreadable regions instead of stopping at the first read error
    #[arg(long)]
    tolerate_errors: bool,

    /// Number of retries of a failed read (with --tolerate-errors)
    #[arg(long, default_value = "2")]
    retries: u8,

    /// Number of bytes skipped after a read error (default: the whole read)
    #[arg(long, default_value = "0")]
    granularity: usize,

    /// Zero the whole granularity block around a read error
    #[arg(long)]
    zero_on_error: bool,

    /// Do not request sudo privileges for device nodes
    #[arg(long)]
    no_escalate: bool,
}

/// Size of the chunks a dump is read in.
const CHUNK_SIZE: usize = 1024 * 1024;

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> io::Result<()> {
    // Device nodes are usually only readable by root
    if !args.no_escalate && is_device_node(&args.source) {
        sudo::escalate_if_needed().map_err(|e| {
            io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("Failed to escalate privileges: {}", e),
            )
        })?;
    }

    smdev::notify::set_verbose(args.verbose);

    let options = Options::new()
        .with_error_tolerance(args.tolerate_errors)
        .with_error_retries(args.retries)
        .with_error_granularity(args.granularity)
        .with_zero_on_error(args.zero_on_error);

    let mut handle = DeviceHandle::with_options(options);
    handle.open(&args.source)?;

    print_device_info(&mut handle)?;

    if let Some(length) = &args.length {
        let media_size = handle.media_size()?;
        let length = match length.as_str() {
            "all" => media_size.saturating_sub(args.offset),
            value => value.parse::<u64>().map_err(|e| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid length {:?}: {}", value, e),
                )
            })?,
        };
        dump(&mut handle, args, length)?;
    }

    print_errors(&handle);

    handle.close()?;
    Ok(())
}

fn is_device_node(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let file_type = metadata.file_type();
            file_type.is_block_device() || file_type.is_char_device()
        }
        Err(_) => false,
    }
}

fn print_device_info(handle: &mut DeviceHandle) -> io::Result<()> {
    let geometry = handle.geometry()?;
    let information = handle.media_information()?;

    if let Some(path) = handle.filename() {
        eprintln!("Device: {}", path.display());
    }
    eprintln!("Bus type: {}", information.bus_type);
    for (label, identifier) in [
        ("Vendor", "vendor"),
        ("Model", "model"),
        ("Serial", "serial_number"),
    ] {
        eprintln!(
            "{}: {}",
            label,
            information.value(identifier).unwrap_or("(unknown)")
        );
    }
    eprintln!("Media type: {}", information.media_type);
    eprintln!(
        "Media size: {} bytes (0x{:x})",
        geometry.media_size, geometry.media_size
    );
    match geometry.bytes_per_sector {
        Some(bytes_per_sector) => {
            eprintln!("Bytes per sector: {}", bytes_per_sector);
            if let Some(sectors) = geometry.number_of_sectors() {
                eprintln!("Number of sectors: {}", sectors);
            }
        }
        None => eprintln!("Bytes per sector: (unknown)"),
    }
    match geometry.max_transfer_size {
        Some(size) => eprintln!("Maximum transfer size: {} bytes", size),
        None => eprintln!("Maximum transfer size: (unknown)"),
    }

    print_sessions(handle)?;
    print_tracks(handle)?;
    Ok(())
}

fn print_sessions(handle: &mut DeviceHandle) -> io::Result<()> {
    let count = handle.number_of_sessions()?;
    if count == 0 {
        return Ok(());
    }
    eprintln!();
    eprintln!("Sessions: {}", count);
    eprintln!("{:<6} {:<14} {:<14} {:<14}", "Index", "First sector", "Last sector", "Sectors");
    eprintln!("{}", "-".repeat(50));
    for i in 0..count {
        let session = handle.session(i)?;
        eprintln!(
            "{:<6} {:<14} {:<14} {:<14}",
            i,
            session.start_sector,
            session.end_sector().saturating_sub(1),
            session.number_of_sectors
        );
    }
    Ok(())
}

fn print_tracks(handle: &mut DeviceHandle) -> io::Result<()> {
    let count = handle.number_of_tracks()?;
    if count == 0 {
        return Ok(());
    }
    eprintln!();
    eprintln!("Tracks: {}", count);
    eprintln!(
        "{:<6} {:<6} {:<14} {:<14} {:<14}",
        "Track", "Type", "First sector", "Last sector", "Sectors"
    );
    eprintln!("{}", "-".repeat(57));
    for i in 0..count {
        let track = handle.track(i)?;
        eprintln!(
            "{:<6} {:<6} {:<14} {:<14} {:<14}",
            track.number,
            track.track_type,
            track.start_sector,
            (track.start_sector + track.number_of_sectors).saturating_sub(1),
            track.number_of_sectors
        );
    }
    Ok(())
}

fn dump(handle: &mut DeviceHandle, args: &Args, length: u64) -> io::Result<()> {
    if length == 0 {
        if args.verbose {
            eprintln!("Nothing to read (length is 0)");
        }
        return Ok(());
    }

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut remaining = length;
    let mut total = 0u64;
    let mut offset = args.offset;

    while remaining > 0 {
        let chunk = remaining.min(CHUNK_SIZE as u64) as usize;
        let bytes_read = handle.read_buffer_at_offset(&mut buf[..chunk], offset)?;
        if bytes_read == 0 {
            break;
        }
        output.write_all(&buf[..bytes_read])?;
        offset += bytes_read as u64;
        total += bytes_read as u64;
        remaining -= bytes_read as u64;
    }
    output.flush()?;

    if args.verbose {
        eprintln!();
        eprintln!("Read {} bytes at offset {}", total, args.offset);
        if let Some(path) = &args.output {
            eprintln!("Output written to: {}", path.display());
        }
    }
    Ok(())
}

fn print_errors(handle: &DeviceHandle) {
    if handle.number_of_errors() == 0 {
        return;
    }
    eprintln!();
    eprintln!("Read errors:");
    eprintln!("{:<6} {:<20} {:<20}", "Index", "Offset", "Size");
    eprintln!("{}", "-".repeat(48));
    for (i, range) in handle.errors().iter().enumerate() {
        eprintln!("{:<6} 0x{:016x} 0x{:016x}", i, range.offset, range.size);
    }
    eprintln!("{}", "-".repeat(48));
    eprintln!("Total: {} error(s)", handle.number_of_errors());
}
