use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use piecetable::model::piece_tree::NeverCancel;
use piecetable::primitives::strings::{complete_utf8_len, escape_new_line};
use piecetable::{BufferConfig, PieceTreeTextBuffer, PieceTreeTextBufferBuilder, Range, SearchQuery};
use regex::bytes::Regex;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Files are handed to the builder in pieces of this size
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Inspect a text file through a piece-table buffer
#[derive(Parser, Debug)]
#[command(name = "piecetable")]
#[command(about = "Load a file into a piece-table text buffer and query it", long_about = None)]
struct Args {
    /// File to load
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Buffer configuration (JSON)
    #[arg(long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print size, line count and line ending information
    Stats {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one line (1-based)
    Line {
        #[arg(value_name = "N")]
        line_number: usize,
    },
    /// Print the ranges matching a pattern
    Find {
        #[arg(value_name = "PATTERN")]
        pattern: String,
        /// Treat the pattern as a regular expression
        #[arg(long)]
        regex: bool,
        /// Let a regular expression match across lines
        #[arg(long, requires = "regex")]
        multiline: bool,
        /// Stop after this many matches
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
}

#[derive(Debug, Serialize)]
struct Stats {
    length: usize,
    line_count: usize,
    eol: String,
    has_bom: bool,
    pieces: usize,
    might_contain_non_basic_ascii: bool,
    might_contain_rtl: bool,
    might_contain_unusual_line_terminators: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let config = match &args.config {
        Some(path) => BufferConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => BufferConfig::default(),
    };

    let buffer = load_buffer(&args.file, &config)?;

    match args.command {
        Command::Stats { json } => print_stats(&buffer, json)?,
        Command::Line { line_number } => {
            let line_count = buffer.get_line_count();
            if line_number == 0 || line_number > line_count {
                anyhow::bail!("line {line_number} is out of range (1..={line_count})");
            }
            println!("{}", buffer.get_line_content(line_number));
        }
        Command::Find {
            pattern,
            regex,
            multiline,
            limit,
        } => {
            let query = if regex {
                let compiled = Regex::new(&pattern)
                    .with_context(|| format!("Invalid regular expression: {pattern}"))?;
                if multiline {
                    SearchQuery::MultilineRegex(compiled)
                } else {
                    SearchQuery::Regex(compiled)
                }
            } else {
                SearchQuery::Word(pattern)
            };

            let line_count = buffer.get_line_count();
            let whole = Range::new(1, 1, line_count, buffer.get_line_max_column(line_count));
            for range in buffer.find(&query, &whole, limit, &NeverCancel) {
                println!(
                    "{range}\t{}",
                    escape_new_line(&buffer.get_value_in_range(&range))
                );
            }
        }
    }

    Ok(())
}

/// Stream `path` into a builder, keeping UTF-8 sequences split by a read intact
fn load_buffer(path: &Path, config: &BufferConfig) -> Result<PieceTreeTextBuffer> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut builder = PieceTreeTextBufferBuilder::with_config(config.clone());
    let mut read_buf = vec![0u8; READ_CHUNK_SIZE];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = file
            .read(&mut read_buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&read_buf[..n]);

        // an incomplete sequence at the end waits for the next read
        let complete = complete_utf8_len(&pending);
        let rest = pending.split_off(complete);
        builder.accept_chunk(&String::from_utf8_lossy(&pending));
        pending = rest;
    }

    if !pending.is_empty() {
        builder.accept_chunk(&String::from_utf8_lossy(&pending));
    }

    let buffer = builder.build(config.default_eol, config.normalize_eol);
    tracing::info!(
        path = %path.display(),
        length = buffer.get_length(),
        lines = buffer.get_line_count(),
        "loaded file"
    );
    Ok(buffer)
}

fn print_stats(buffer: &PieceTreeTextBuffer, json: bool) -> Result<()> {
    let stats = Stats {
        length: buffer.get_length(),
        line_count: buffer.get_line_count(),
        eol: escape_new_line(buffer.get_eol()),
        has_bom: !buffer.get_bom().is_empty(),
        pieces: buffer.piece_tree().piece_count(),
        might_contain_non_basic_ascii: buffer.might_contain_non_basic_ascii(),
        might_contain_rtl: buffer.might_contain_rtl(),
        might_contain_unusual_line_terminators: buffer.might_contain_unusual_line_terminators(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?
        );
        return Ok(());
    }

    println!("length:      {}", stats.length);
    println!("lines:       {}", stats.line_count);
    println!("eol:         {}", stats.eol);
    println!("bom:         {}", stats.has_bom);
    println!("pieces:      {}", stats.pieces);
    println!("non-ascii:   {}", stats.might_contain_non_basic_ascii);
    println!("rtl:         {}", stats.might_contain_rtl);
    println!("unusual eol: {}", stats.might_contain_unusual_line_terminators);
    Ok(())
}
