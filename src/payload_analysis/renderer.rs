use std::fmt::Write;

use super::classifier::{classify, is_printable, ContentKind};
use super::hex_dump::hex_dump;
use crate::data_capture::types::{ProtocolTag, ReassembledRecord};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
pub const REQUEST_LINE_MARKER: &str = "▶ ";
pub const NO_DATA: &str = "[no data]";
pub const NO_PRINTABLE_CONTENT: &str = "[no printable content]";
pub const BINARY_CONTENT: &str = "[binary or encrypted content]";

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Append a hex dump below the binary marker.
    pub dump_binary: bool,
}

/// Renders one record as a console block: a header line, the classified
/// content, and a trailing blank line.
pub fn render_record(
    sequence: u64,
    record: &ReassembledRecord,
    options: &RenderOptions,
) -> String {
    let kind = classify(&record.payload);
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[#{}] segment {} | {} | {} | {} | {} bytes | {}",
        sequence,
        record.segment_index,
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.protocol,
        endpoints(record),
        record.length,
        kind
    );

    if record.payload.is_empty() {
        out.push_str(NO_DATA);
        out.push('\n');
    } else {
        match kind {
            ContentKind::Http => render_http(&mut out, &record.payload),
            ContentKind::Json => push_block(&mut out, &String::from_utf8_lossy(&record.payload)),
            ContentKind::Text => render_text(&mut out, &record.payload),
            ContentKind::Binary => {
                out.push_str(BINARY_CONTENT);
                out.push('\n');
                if options.dump_binary {
                    out.push_str(&hex_dump(&record.payload));
                }
            }
        }
    }
    out.push('\n');
    out
}

fn endpoints(record: &ReassembledRecord) -> String {
    if record.protocol.has_ports() {
        record.flow.to_string()
    } else {
        format!("{} -> {}", record.flow.src_addr, record.flow.dst_addr)
    }
}

/// Marked start line, `name: value` headers up to the first blank line,
/// then the body as is.
fn render_http(out: &mut String, payload: &[u8]) {
    let text = String::from_utf8_lossy(payload);
    let mut lines = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line));

    if let Some(start_line) = lines.next() {
        let _ = writeln!(out, "{}{}", REQUEST_LINE_MARKER, start_line);
    }

    let mut in_body = false;
    for line in lines {
        if in_body {
            out.push_str(line);
            out.push('\n');
        } else if line.trim().is_empty() {
            in_body = true;
            out.push('\n');
        } else {
            match line.split_once(':') {
                Some((name, value)) => {
                    let _ = writeln!(out, "  {}: {}", name.trim(), value.trim());
                }
                None => {
                    let _ = writeln!(out, "  {}", line.trim());
                }
            }
        }
    }
}

fn render_text(out: &mut String, payload: &[u8]) {
    let filtered: String = String::from_utf8_lossy(payload)
        .chars()
        .filter(|c| is_printable(*c))
        .collect();
    if filtered.is_empty() {
        out.push_str(NO_PRINTABLE_CONTENT);
        out.push('\n');
    } else {
        push_block(out, &filtered);
    }
}

fn push_block(out: &mut String, text: &str) {
    out.push_str(text);
    if !text.ends_with('\n') {
        out.push('\n');
    }
}
