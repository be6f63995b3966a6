/*!
 * Sample CLI: stream files or objects into memory and report throughput.
 */

use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;

use quasar_streamer::{
    init_logging, Credentials, DstBuffer, FileRequest, ResponseCode, Streamer, StorageUri,
};

#[derive(Parser)]
#[command(
    name = "quasar-streamer",
    about = "Stream files or objects into host memory and report throughput"
)]
struct Args {
    /// Files or object URIs (s3://, gs://, azure://) to stream
    #[arg(required = true)]
    paths: Vec<String>,

    /// Offset to start reading each file from
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Bytes to read per file; defaults to the whole file (filesystem paths only)
    #[arg(long)]
    bytesize: Option<u64>,

    /// Number of sub-ranges per file (one completion event each)
    #[arg(long, default_value_t = 1)]
    sub_ranges: u64,
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut files = Vec::new();
    for path in &args.paths {
        let bytesize = match args.bytesize {
            Some(size) => size,
            None => {
                if StorageUri::parse(path).is_some() {
                    bail!("--bytesize is required for object storage paths");
                }
                let metadata = std::fs::metadata(path)
                    .with_context(|| format!("failed to stat {}", path))?;
                metadata.len().saturating_sub(args.offset)
            }
        };

        files.push(FileRequest {
            path: path.clone(),
            offset: args.offset,
            bytesize,
            sub_sizes: split_sub_ranges(bytesize, args.sub_ranges),
        });
    }

    let total_bytes: u64 = files.iter().map(|f| f.bytesize).sum();
    let total_events: usize = files.iter().map(|f| f.sub_sizes.len()).sum();
    let mut buffer = vec![0u8; total_bytes as usize];
    let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

    let mut streamer = Streamer::new().context("failed to start the streamer")?;
    let start = Instant::now();
    streamer
        .request(&files, dst, Credentials::default())
        .map_err(|e| anyhow::anyhow!("request failed: {}", e))?;

    let mut failures = 0usize;
    for _ in 0..total_events {
        let response = streamer.response();
        match response.ret {
            ResponseCode::Success => {}
            ResponseCode::FinishedError => break,
            code => {
                eprintln!(
                    "sub request {} of file {} failed: {}",
                    response.index, response.file_index, code
                );
                failures += 1;
            }
        }
    }

    let elapsed = start.elapsed();
    let seconds = elapsed.as_secs_f64();
    let throughput = if seconds > 0.0 {
        total_bytes as f64 / seconds
    } else {
        0.0
    };

    println!(
        "read {} bytes from {} files in {:.3} s ({:.1} MiB/s), {} failed sub requests",
        total_bytes,
        files.len(),
        seconds,
        throughput / (1024.0 * 1024.0),
        failures
    );

    if failures > 0 {
        bail!("{} sub requests failed", failures);
    }
    Ok(())
}

/// Split `bytesize` into `count` near-equal sub-ranges (at least one).
fn split_sub_ranges(bytesize: u64, count: u64) -> Vec<u64> {
    let count = count.max(1);
    let base = bytesize / count;
    let remainder = bytesize % count;
    (0..count)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}
