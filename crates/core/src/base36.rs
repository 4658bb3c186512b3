//! Base-36 integer text
//!
//! Transaction ids and the `next-ids` counters are serialized as lowercase
//! base-36. The encoding must round-trip exactly: parse rejects empty input,
//! uppercase digits and overflow.

use crate::error::{Error, Result};

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode a value as lowercase base-36 with no padding.
pub fn encode(mut value: u64) -> String {
    let mut buf = [0u8; 13];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = DIGITS[(value % 36) as usize];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    // buf[pos..] is ASCII by construction
    String::from_utf8_lossy(&buf[pos..]).into_owned()
}

/// Parse lowercase base-36 text.
pub fn parse(text: &str) -> Result<u64> {
    if text.is_empty() {
        return Err(Error::Corrupt("empty base-36 number".to_string()));
    }
    let mut value: u64 = 0;
    for b in text.bytes() {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u64,
            b'a'..=b'z' => (b - b'a') as u64 + 10,
            _ => {
                return Err(Error::Corrupt(format!(
                    "invalid base-36 digit in '{text}'"
                )))
            }
        };
        value = value
            .checked_mul(36)
            .and_then(|v| v.checked_add(digit))
            .ok_or_else(|| Error::Corrupt(format!("base-36 overflow in '{text}'")))?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_zero() {
        assert_eq!(encode(0), "0");
    }

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode(35), "z");
        assert_eq!(encode(36), "10");
        assert_eq!(encode(1295), "zz");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("1Z").is_err());
        assert!(parse("12 ").is_err());
        assert!(parse("zzzzzzzzzzzzzzzz").is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(v in any::<u64>()) {
            prop_assert_eq!(parse(&encode(v)).unwrap(), v);
        }
    }
}
