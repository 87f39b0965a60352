use std::fmt::Write;

/// Renders `data` as an offset / hex / ASCII dump, 16 bytes per line.
pub fn format_hexdump(data: &[u8]) -> String {
    let mut result = String::new();

    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(result, "0x{:04x}:  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            let _ = write!(result, "{:02x}", byte);

            // Space after every byte, and an extra one after 8 bytes
            if j < chunk.len() - 1 {
                result.push(' ');
                if j == 7 {
                    result.push(' ');
                }
            }
        }

        // Pad incomplete lines so the ASCII column lines up
        if chunk.len() < 16 {
            let padding = (16 - chunk.len()) * 3 + usize::from(chunk.len() <= 8);
            result.push_str(&" ".repeat(padding));
        }

        result.push_str("  ");
        result.extend(chunk.iter().map(|&byte| {
            if byte.is_ascii_graphic() {
                byte as char
            } else {
                '.'
            }
        }));
        result.push('\n');
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(format_hexdump(&[]), "");
    }

    #[test]
    fn full_and_partial_lines_align() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = format_hexdump(&data);
        let lines: Vec<&str> = dump.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "0x0000:  41 42 43 44 45 46 47 48  49 4a 4b 4c 4d 4e 4f 50  ABCDEFGHIJKLMNOP"
        );
        assert!(lines[1].starts_with("0x0010:  51 52 53 54"));
        assert!(lines[1].ends_with("  QRST"));
        assert_eq!(lines[0].find("AB"), lines[1].find("QR"));
    }

    #[test]
    fn non_printable_bytes_are_dotted() {
        assert!(format_hexdump(&[0x00, 0x7f, 0x20]).ends_with("  ...\n"));
    }
}
