//! Canonical hex/ASCII dump formatting for the USB traffic log.
//!
//! One line covers 16 bytes: a 4-digit hex offset, the byte values with a
//! double space after the eighth, and an ASCII gutter where anything
//! outside 0x20..=0x7E prints as a dot.
//!
//! ```text
//! 0000  48 65 6C 6C 6F 0A DB 05  08 00 01 02 03 04 05 06  |Hello...........|
//! 0010  07 08                                             |..|
//! ```

/// Formats `data` into dump lines, appending each to `out`.
pub fn dump_lines(data: &[u8], out: &mut Vec<String>) {
    for (row, chunk) in data.chunks(16).enumerate() {
        out.push(format_row(row * 16, chunk));
    }
}

/// Formats one 16-byte (or shorter, for the tail) row.
fn format_row(offset: usize, chunk: &[u8]) -> String {
    debug_assert!(chunk.len() <= 16);
    let mut line = String::with_capacity(78);
    line.push_str(&format!("{offset:04X}  "));

    for i in 0..16 {
        if i == 8 {
            line.push(' ');
        }
        match chunk.get(i) {
            Some(b) => line.push_str(&format!("{b:02X} ")),
            None => line.push_str("   "),
        }
    }

    line.push(' ');
    line.push('|');
    for &b in chunk {
        line.push(if (0x20..=0x7E).contains(&b) {
            b as char
        } else {
            '.'
        });
    }
    line.push('|');
    line
}
