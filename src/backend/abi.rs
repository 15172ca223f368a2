//! Just enough of the Solidity ABI for the MetaSave contract calls:
//! `address` and `string` arguments, `string` return values.

use sha3::{Digest, Keccak256};

#[derive(Debug, Clone)]
pub enum Token {
    Address(String),
    String(String),
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

pub fn encode_call(signature: &str, args: &[Token]) -> Result<Vec<u8>, String> {
    let mut head = Vec::with_capacity(args.len() * 32);
    let mut tail = Vec::new();
    let head_len = args.len() * 32;

    for arg in args {
        match arg {
            Token::Address(addr) => head.extend_from_slice(&encode_address(addr)?),
            Token::String(s) => {
                head.extend_from_slice(&encode_uint((head_len + tail.len()) as u64));
                tail.extend_from_slice(&encode_uint(s.len() as u64));
                tail.extend_from_slice(s.as_bytes());
                let pad = (32 - s.len() % 32) % 32;
                tail.extend(std::iter::repeat(0u8).take(pad));
            }
        }
    }

    let mut out = selector(signature).to_vec();
    out.extend(head);
    out.extend(tail);
    Ok(out)
}

/// Decode a single `string` return value. An empty result (`0x`) is what a
/// node hands back for a view that returned nothing, so it decodes to "".
pub fn decode_string(data: &[u8]) -> Result<String, String> {
    if data.is_empty() {
        return Ok(String::new());
    }
    let offset = read_word(data, 0)?;
    let len = read_word(data, offset)?;
    let start = offset.checked_add(32).ok_or("offset overflow")?;
    let end = start.checked_add(len).ok_or("length overflow")?;
    let bytes = data
        .get(start..end)
        .ok_or_else(|| format!("string runs past end of data ({} > {})", end, data.len()))?;
    String::from_utf8(bytes.to_vec()).map_err(|e| e.to_string())
}

fn read_word(data: &[u8], at: usize) -> Result<usize, String> {
    let end = at.checked_add(32).ok_or_else(|| format!("word offset {} overflows", at))?;
    let word = data
        .get(at..end)
        .ok_or_else(|| format!("no 32 byte word at offset {}", at))?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(format!("word at offset {} does not fit in usize", at));
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(buf) as usize)
}

fn encode_uint(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn encode_address(addr: &str) -> Result<[u8; 32], String> {
    let raw = addr.trim_start_matches("0x").trim_start_matches("0X");
    let bytes = hex::decode(raw).map_err(|e| format!("bad address {}: {}", addr, e))?;
    if bytes.len() != 20 {
        return Err(format!("bad address {}: expected 20 bytes", addr));
    }
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&bytes);
    Ok(word)
}
