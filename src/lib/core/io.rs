use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use grep_cli::stdout;
use gzp::{deflate::Gzip, Compression, ZBuilder};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use termcolor::ColorChoice;

fn is_stdio<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref() == Path::new("-")
}

/// Open a text source, transparently decoding gzip. `None` or `-` reads stdin.
pub fn open_text<P: AsRef<Path>>(path: &Option<P>, gzipped: bool) -> Result<Box<dyn BufRead>> {
    let raw_reader: Box<dyn Read> = match path {
        Some(path) if !is_stdio(path) => Box::new(
            File::open(path.as_ref())
                .with_context(|| format!("Failed to open {}", path.as_ref().display()))?,
        ),
        _ => Box::new(io::stdin()),
    };

    let reader: Box<dyn BufRead> = if gzipped {
        Box::new(BufReader::with_capacity(
            256 * 1024,
            MultiGzDecoder::new(raw_reader),
        ))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, raw_reader))
    };
    Ok(reader)
}

/// Build a CSV reader for optional file/stdin sources.
pub fn get_reader<P: AsRef<Path>>(
    path: &Option<P>,
    has_headers: bool,
    gzipped: bool,
    delimiter: u8,
) -> Result<csv::Reader<Box<dyn BufRead>>> {
    let raw_reader = open_text(path, gzipped)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .from_reader(raw_reader))
}

/// Build a raw writer targeting a file or stdout with optional gzip compression.
pub fn get_raw_writer<P: AsRef<Path>>(
    path: &Option<P>,
    gzipped: bool,
    threads: usize,
    compression_level: u32,
) -> Result<Box<dyn Write>> {
    let raw_writer: Box<dyn Write> = match path {
        Some(path) if !is_stdio(path) => {
            let writer = BufWriter::new(
                File::create(path.as_ref())
                    .with_context(|| format!("Failed to create {}", path.as_ref().display()))?,
            );
            if gzipped {
                Box::new(
                    ZBuilder::<Gzip, _>::new()
                        .num_threads(threads)
                        .compression_level(Compression::new(compression_level))
                        .from_writer(writer),
                )
            } else {
                Box::new(writer)
            }
        }
        _ => {
            let writer = stdout(ColorChoice::Never);
            if gzipped {
                Box::new(
                    ZBuilder::<Gzip, _>::new()
                        .num_threads(threads)
                        .compression_level(Compression::new(compression_level))
                        .from_writer(writer),
                )
            } else {
                Box::new(writer)
            }
        }
    };
    Ok(raw_writer)
}

/// Build a CSV writer targeting a file or stdout with optional gzip compression.
pub fn get_writer<P: AsRef<Path>>(
    path: &Option<P>,
    gzipped: bool,
    write_headers: bool,
    delimiter: u8,
    threads: usize,
    compression_level: u32,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let raw_writer = get_raw_writer(path, gzipped, threads, compression_level)?;
    Ok(csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(write_headers)
        .from_writer(raw_writer))
}

/// Read a file-of-filenames: one path per line, blank lines and `#` comments skipped.
pub fn read_fofn<P: AsRef<Path>>(fofn: P) -> Result<Vec<PathBuf>> {
    let fofn = fofn.as_ref();
    let reader = open_text(&Some(fofn), crate::core::fs::is_gzipped(fofn))?;

    let mut paths = Vec::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", fofn.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        paths.push(PathBuf::from(trimmed));
    }
    Ok(paths)
}
