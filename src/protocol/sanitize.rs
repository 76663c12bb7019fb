// src/protocol/sanitize.rs
//
// Printable-ASCII filter applied to every line (ASTM) or frame (KeyValue)
// before parsing. Control bytes, padding and anything that is not 7-bit
// printable (including the bytes of multi-byte UTF-8 sequences) are dropped.

/// Keep only bytes in `0x20..=0x7E`, then trim surrounding whitespace.
pub fn sanitize(input: &[u8]) -> String {
    let printable: String = input
        .iter()
        .filter(|b| is_printable(**b))
        .map(|&b| b as char)
        .collect();
    printable.trim().to_string()
}

/// `sanitize` for text that has already been decoded.
pub fn sanitize_str(input: &str) -> String {
    sanitize(input.as_bytes())
}

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}
