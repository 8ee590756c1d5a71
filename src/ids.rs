//! Identifier generation, validation, and filename sanitization.
//!
//! Mirrors the teacher's use of `rand`'s OS-seeded generator for federation
//! keypairs — here the same RNG produces session codes and file/upload IDs
//! instead, so no new randomness dependency is introduced.

use rand::Rng;

/// 32-symbol alphabet with ambiguous glyphs (`0/O/1/I`) removed.
const SESSION_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const SESSION_CODE_LEN: usize = 5;

/// Draws 5 symbols from the unambiguous alphabet with a cryptographically
/// secure RNG. 256 % 32 == 0, so a raw byte-to-symbol mapping is already
/// uniform and needs no rejection sampling.
pub fn new_session_code() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_CODE_LEN)
        .map(|_| {
            let byte: u8 = rng.gen();
            SESSION_CODE_ALPHABET[(byte % 32) as usize] as char
        })
        .collect()
}

fn random_hex(num_bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..num_bytes).map(|_| rng.gen()).collect();
    hex::encode(&bytes)
}

/// 16 random bytes, lower-case hex (32 chars).
pub fn new_file_id() -> String {
    random_hex(16)
}

/// Same shape as a file ID but a distinct namespace of values.
pub fn new_upload_id() -> String {
    random_hex(16)
}

/// `msg_<millis>_<8hex>`.
pub fn new_message_id(now_ms: i64) -> String {
    format!("msg_{}_{}", now_ms, random_hex(4))
}

/// Case-insensitive match of `^[A-HJ-NP-Z2-9]{5}$`.
pub fn is_valid_session_code(s: &str) -> bool {
    let upper = s.to_ascii_uppercase();
    upper.len() == SESSION_CODE_LEN
        && upper.bytes().all(|b| SESSION_CODE_ALPHABET.contains(&b))
}

/// Normalizes a session code to its canonical upper-case form. Caller should
/// validate with [`is_valid_session_code`] first.
pub fn canonical_session_code(s: &str) -> String {
    s.to_ascii_uppercase()
}

/// `^[0-9a-f]{32}$`, case-insensitive.
pub fn is_valid_file_id(s: &str) -> bool {
    let lower = s.to_ascii_lowercase();
    lower.len() == 32 && lower.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Removes path separators, null bytes, and `..` sequences; truncates to 255
/// bytes; falls back to `"unnamed"` if nothing survives.
pub fn sanitize_filename(s: &str) -> String {
    let cleaned: String = s
        .replace('/', "")
        .replace('\\', "")
        .replace('\0', "")
        .replace("..", "");

    let mut truncated = cleaned;
    if truncated.len() > 255 {
        while !truncated.is_char_boundary(255) {
            truncated.pop();
        }
        truncated.truncate(255);
    }

    if truncated.is_empty() {
        "unnamed".to_string()
    } else {
        truncated
    }
}
