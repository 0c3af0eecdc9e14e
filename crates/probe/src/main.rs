use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use wire::{FrameWriter, ResponseBox, ResponseReader, WireError};

/// Send image files to a detection server and print what comes back.
#[derive(Parser, Debug)]
#[command(name = "probe", version)]
struct Args {
    /// Image files or glob patterns (e.g. "frames/*.jpg")
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9888")]
    addr: String,

    /// Send every image this many times
    #[arg(short, long, default_value_t = 1)]
    repeat: u32,

    /// How long to wait for a response before assuming the frame was skipped.
    /// The connection is reopened after a timeout, so a late answer is never
    /// paired with the next frame; keep this above the server's slowest frame.
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Print one JSON object per frame instead of text
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    file: &'a str,
    round_trip_ms: f64,
    skipped: bool,
    boxes: &'a [ResponseBox],
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let files = expand_inputs(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No input files matched {:?}", args.inputs);
    }

    let timeout = Duration::from_millis(args.timeout_ms);
    let mut connection = Some(Connection::open(&args.addr, timeout)?);

    let mut sent = 0u32;
    let mut answered = 0u32;
    let mut total_boxes = 0usize;
    let mut total_time = Duration::ZERO;

    for path in &files {
        let payload =
            fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if image::guess_format(&payload).is_err() {
            eprintln!("Skipping {}: not a recognised image", path.display());
            continue;
        }
        let name = path.display().to_string();

        for _ in 0..args.repeat {
            let start = Instant::now();
            let boxes = exchange(&mut connection, &args.addr, timeout, &payload)?;
            sent += 1;
            let elapsed = start.elapsed();

            if let Some(boxes) = &boxes {
                answered += 1;
                total_boxes += boxes.len();
                total_time += elapsed;
            }

            report(&args, &name, elapsed, boxes.as_deref())?;
        }
    }

    let mean_ms = if answered > 0 {
        total_time.as_secs_f64() * 1000.0 / answered as f64
    } else {
        0.0
    };
    eprintln!(
        "Sent {sent} frames, {answered} answered, {total_boxes} boxes, mean round trip {mean_ms:.1} ms"
    );

    Ok(())
}

/// One client connection with its framing halves.
struct Connection {
    frames: FrameWriter<TcpStream>,
    responses: ResponseReader<BufReader<TcpStream>>,
}

impl Connection {
    fn open(addr: &str, timeout: Duration) -> anyhow::Result<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("Failed to connect to {addr}"))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;

        Ok(Self {
            frames: FrameWriter::new(stream.try_clone()?),
            responses: ResponseReader::new(BufReader::new(stream)),
        })
    }
}

/// Send one frame and wait for its line. `None` means no answer in time.
///
/// Undecodable frames get no line, but neither does a frame the server is
/// still working on, so a timed-out connection is dropped and the next
/// frame goes out on a fresh one.
fn exchange(
    connection: &mut Option<Connection>,
    addr: &str,
    timeout: Duration,
    payload: &[u8],
) -> anyhow::Result<Option<Vec<ResponseBox>>> {
    let conn = match connection.take() {
        Some(conn) => conn,
        None => Connection::open(addr, timeout)?,
    };
    let conn = connection.insert(conn);

    conn.frames.write_frame(payload)?;
    match conn.responses.read_response() {
        Ok(Some(boxes)) => Ok(Some(boxes)),
        Ok(None) => anyhow::bail!("Server closed the connection"),
        Err(WireError::Timeout) => {
            *connection = None;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn expand_inputs(inputs: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let mut matched = false;
        for entry in glob::glob(input).with_context(|| format!("Bad pattern {input}"))? {
            files.push(entry?);
            matched = true;
        }
        if !matched {
            eprintln!("Nothing matches {input}");
        }
    }
    Ok(files)
}

fn report(
    args: &Args,
    file: &str,
    elapsed: Duration,
    boxes: Option<&[ResponseBox]>,
) -> anyhow::Result<()> {
    let round_trip_ms = elapsed.as_secs_f64() * 1000.0;

    if args.json {
        let line = serde_json::to_string(&FrameReport {
            file,
            round_trip_ms,
            skipped: boxes.is_none(),
            boxes: boxes.unwrap_or_default(),
        })?;
        println!("{line}");
        return Ok(());
    }

    match boxes {
        None => println!("{file}: no response within {} ms (skipped)", args.timeout_ms),
        Some(boxes) => {
            println!("{file}: {} boxes in {round_trip_ms:.1} ms", boxes.len());
            for b in boxes {
                println!(
                    "  class {:>3} at ({}, {}) {}x{}",
                    b.class_id, b.x, b.y, b.width, b.height
                );
            }
        }
    }
    Ok(())
}
