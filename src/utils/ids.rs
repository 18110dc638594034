use crate::{PortraitError, Result};

const ID_BYTES: usize = 16;

/// 128 random bits, lowercase hex. Fails rather than falling back to a predictable id.
pub(crate) fn random_hex_id() -> Result<String> {
    let mut bytes = [0u8; ID_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|err| PortraitError::Internal(format!("os rng unavailable: {err}")))?;
    Ok(hex_encode(&bytes))
}

pub(crate) fn is_hex_id(value: &str) -> bool {
    value.len() == ID_BYTES * 2
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}
