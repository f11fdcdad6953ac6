use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::types::{DataFormat, ProbeResult};

const CSV_HEADERS: [&str; 11] = [
    "url",
    "status_code",
    "content_length",
    "response_time_ms",
    "title",
    "server",
    "redirect",
    "error",
    "alive",
    "verified",
    "checked_at",
];

/// Reads candidates from a file, or stdin when the path is `-`. Lines are
/// trimmed; blank lines and `#` comments are skipped; an existing protocol
/// prefix is stripped so the probe client owns protocol selection.
pub fn load_candidates(path: &str) -> io::Result<Vec<String>> {
    let content = read_input(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.strip_prefix("https://")
                .or_else(|| line.strip_prefix("http://"))
                .unwrap_or(line)
                .to_string()
        })
        .collect())
}

pub fn load_proxies(path: &str) -> io::Result<Vec<String>> {
    let content = read_input(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn read_input(path: &str) -> io::Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
}

pub fn detect_data_format(path: &str, fallback: DataFormat) -> DataFormat {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".jsonl") || lower.ends_with(".json") {
        DataFormat::Jsonl
    } else if lower.ends_with(".csv") {
        DataFormat::Csv
    } else if lower.ends_with(".txt") {
        DataFormat::Text
    } else {
        fallback
    }
}

/// `domains.txt` becomes `domains_alive.txt` next to the input, matching
/// the format-specific extension.
pub fn default_output_path(input: &str, format: DataFormat) -> String {
    let suffix = match format {
        DataFormat::Text => "txt",
        DataFormat::Jsonl => "jsonl",
        DataFormat::Csv => "csv",
    };
    if input == "-" {
        return format!("alive.{suffix}");
    }
    let trimmed = match Path::new(input).extension().and_then(|ext| ext.to_str()) {
        Some(ext) => &input[..input.len() - ext.len() - 1],
        None => input,
    };
    format!("{trimmed}_alive.{suffix}")
}

enum SinkKind {
    Text(BufWriter<File>),
    Jsonl(BufWriter<File>),
    Csv(Box<csv::Writer<File>>),
}

pub struct OutputSink {
    kind: SinkKind,
    include_failed: bool,
}

impl OutputSink {
    pub fn new(path: &str, format: DataFormat, include_failed: bool) -> io::Result<Self> {
        let kind = match format {
            DataFormat::Text => SinkKind::Text(BufWriter::new(File::create(path)?)),
            DataFormat::Jsonl => SinkKind::Jsonl(BufWriter::new(File::create(path)?)),
            DataFormat::Csv => {
                let mut writer = csv::Writer::from_writer(File::create(path)?);
                writer.write_record(CSV_HEADERS)?;
                SinkKind::Csv(Box::new(writer))
            }
        };
        Ok(OutputSink {
            kind,
            include_failed,
        })
    }

    pub fn write_result(&mut self, result: &ProbeResult) -> io::Result<()> {
        if !result.alive && !self.include_failed {
            return Ok(());
        }

        match &mut self.kind {
            SinkKind::Text(writer) => {
                if result.alive {
                    writeln!(writer, "{}", result.url)?;
                } else {
                    match &result.error {
                        Some(error) => writeln!(writer, "{} [{error}]", result.url)?,
                        None => writeln!(writer, "{} [status {}]", result.url, result.status_code)?,
                    }
                }
            }
            SinkKind::Jsonl(writer) => {
                let line = serde_json::to_string(result)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
                writeln!(writer, "{line}")?;
            }
            SinkKind::Csv(writer) => {
                writer.write_record([
                    result.url.clone(),
                    result.status_code.to_string(),
                    result.content_length.to_string(),
                    result.response_time_ms.to_string(),
                    result.title.clone().unwrap_or_default(),
                    result.server.clone().unwrap_or_default(),
                    result.redirect.clone().unwrap_or_default(),
                    result.error.clone().unwrap_or_default(),
                    result.alive.to_string(),
                    result.verified.to_string(),
                    result.checked_at.clone(),
                ])?;
            }
        }

        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.kind {
            SinkKind::Text(writer) | SinkKind::Jsonl(writer) => writer.flush(),
            SinkKind::Csv(writer) => writer.flush(),
        }
    }

    pub fn finalize(&mut self) -> io::Result<()> {
        self.flush()
    }
}
