//! Quote-safe escaping for values embedded in a double-quoted log field.
//!
//! Input is treated as raw bytes. Malformed UTF-8 never causes a failure,
//! each offending byte degrades to a `\xNN` escape instead.

const LOWERHEX: &[u8; 16] = b"0123456789abcdef";

/// Appends `s` to `buf`, escaped so it can sit between double quotes on a
/// single log line.
///
/// - printable characters are copied as is
/// - `"` and `\` are backslashed
/// - `\a \b \f \n \r \t \v` use their short forms
/// - other bytes below `0x20` and every byte of a malformed UTF-8 sequence
///   become `\xNN`
/// - remaining non-printable characters become `\uNNNN` or `\UNNNNNNNN`
pub fn append_quoted(buf: &mut Vec<u8>, s: &[u8]) {
    buf.reserve(s.len());

    for chunk in s.utf8_chunks() {
        for c in chunk.valid().chars() {
            append_char(buf, c);
        }
        for &byte in chunk.invalid() {
            append_hex_byte(buf, byte);
        }
    }
}

/// Returns the escaped form of `s` as a string.
pub fn quote(s: impl AsRef<[u8]>) -> String {
    let s = s.as_ref();
    let mut buf = Vec::with_capacity(s.len() * 3 / 2);
    append_quoted(&mut buf, s);
    // Every byte written is either copied from a valid UTF-8 chunk or ASCII.
    String::from_utf8_lossy(&buf).into_owned()
}

fn append_char(buf: &mut Vec<u8>, c: char) {
    match c {
        '"' | '\\' => {
            buf.push(b'\\');
            buf.push(c as u8);
        }
        c if is_printable(c) => {
            let mut tmp = [0u8; 4];
            buf.extend_from_slice(c.encode_utf8(&mut tmp).as_bytes());
        }
        '\x07' => buf.extend_from_slice(br"\a"),
        '\x08' => buf.extend_from_slice(br"\b"),
        '\x0c' => buf.extend_from_slice(br"\f"),
        '\n' => buf.extend_from_slice(br"\n"),
        '\r' => buf.extend_from_slice(br"\r"),
        '\t' => buf.extend_from_slice(br"\t"),
        '\x0b' => buf.extend_from_slice(br"\v"),
        c if c < ' ' => append_hex_byte(buf, c as u8),
        // `char` never exceeds U+10FFFF, so no clamping to U+FFFD is needed.
        c if (c as u32) < 0x10000 => {
            buf.extend_from_slice(br"\u");
            append_hex(buf, c as u32, 4);
        }
        c => {
            buf.extend_from_slice(br"\U");
            append_hex(buf, c as u32, 8);
        }
    }
}

fn append_hex_byte(buf: &mut Vec<u8>, byte: u8) {
    buf.extend_from_slice(br"\x");
    buf.push(LOWERHEX[(byte >> 4) as usize]);
    buf.push(LOWERHEX[(byte & 0xf) as usize]);
}

fn append_hex(buf: &mut Vec<u8>, value: u32, digits: u32) {
    for shift in (0..digits).rev() {
        buf.push(LOWERHEX[((value >> (shift * 4)) & 0xf) as usize]);
    }
}

/// Non-ASCII printability follows the Unicode tables behind
/// `str::escape_debug`: controls, format characters, separators other than
/// space, private use and unassigned code points are not printable.
fn is_printable(c: char) -> bool {
    if c.is_ascii() {
        return matches!(c, ' '..='~');
    }

    // A leading space keeps combining marks from being escaped as a
    // string start.
    let mut tmp = [0u8; 5];
    tmp[0] = b' ';
    let len = c.encode_utf8(&mut tmp[1..]).len();
    std::str::from_utf8(&tmp[..=len]).is_ok_and(|s| s.escape_debug().skip(1).eq([c]))
}
