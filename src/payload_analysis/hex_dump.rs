use std::fmt::Write;

const BYTES_PER_ROW: usize = 16;
const HEX_COLUMN_WIDTH: usize = 50;

/// Formats `data` as rows of offset, hex bytes and ASCII.
///
/// ```text
/// 0000: 47 45 54 20 2f 20 48 54  54 50 2f 31 2e 31 0d 0a   GET / HTTP/1.1..
/// ```
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        let mut hex = String::with_capacity(HEX_COLUMN_WIDTH);
        for (i, byte) in chunk.iter().enumerate() {
            let _ = write!(hex, "{:02x} ", byte);
            if i == 7 {
                hex.push(' ');
            }
        }
        let ascii: String = chunk
            .iter()
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        let _ = writeln!(
            out,
            "{:04x}: {:<width$}  {}",
            row * BYTES_PER_ROW,
            hex,
            ascii,
            width = HEX_COLUMN_WIDTH
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_row_has_gap_after_eighth_byte() {
        let dump = hex_dump(b"GET / HTTP/1.1\r\n");
        assert_eq!(dump.lines().count(), 1);
        let line = dump.lines().next().unwrap();
        assert!(line.starts_with("0000: 47 45 54 20 2f 20 48 54  54 50 2f 31"));
        assert!(line.ends_with("  GET / HTTP/1.1.."));
    }

    #[test]
    fn short_last_row_keeps_ascii_column_aligned() {
        let data: Vec<u8> = (0u8..20).collect();
        let dump = hex_dump(&data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("0010: 10 11 12 13"));
        assert_eq!(lines[0].find("  ....").unwrap(), lines[1].find("  ....").unwrap());
        assert_eq!(&lines[1][6 + HEX_COLUMN_WIDTH..], "  ....");
    }

    #[test]
    fn empty_input_dumps_nothing() {
        assert!(hex_dump(&[]).is_empty());
    }
}
