//! The subset of Hessian 2.0 serialization that Dubbo generic invocation
//! touches: null, compact int32, strings and chunked binary, plus the
//! UTF-8 to `\uXXXX` escape the request path needs.
//!
//! Encoders append to a [`Buffer`]; decoders consume from a cursor over the
//! frame body. String lengths on the wire count UTF-8 *characters*, not
//! bytes.

use crate::buffer::Buffer;
use crate::shared::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Cursor;
use std::str;

// Payload cap of a single string/binary chunk (two-byte length prefix).
const CHUNK_MAX: usize = 0xffff;

const STRING_MAX: usize = 0x7fff;

pub fn encode_null(buf: &mut Buffer) {
    buf.append_u8(b'N');
}

pub fn decode_null(cur: &mut Cursor<&[u8]>) -> NetworkResult<()> {
    match cur.read_u8()? {
        b'N' => Ok(()),
        _ => Err(NetworkError::Fatal(ErrorType::BadTag)),
    }
}

/// Emits the shortest of the four int32 forms.
pub fn encode_int(buf: &mut Buffer, val: i32) {
    if (-0x10..=0x2f).contains(&val) {
        buf.append_u8((val + 0x90) as u8);
    } else if (-0x800..=0x7ff).contains(&val) {
        buf.append_u8(((val >> 8) + 0xc8) as u8);
        buf.append_u8((val & 0xff) as u8);
    } else if (-0x40000..=0x3ffff).contains(&val) {
        buf.append_u8(((val >> 16) + 0xd4) as u8);
        buf.append_u16((val & 0xffff) as u16);
    } else {
        buf.append_u8(b'I');
        buf.append_u32(val as u32);
    }
}

pub fn decode_int(cur: &mut Cursor<&[u8]>) -> NetworkResult<i32> {
    let code = cur.read_u8()?;

    match code {
        0x80..=0xbf => Ok(i32::from(code) - 0x90),
        0xc0..=0xcf => {
            let low = cur.read_u8()?;
            Ok(((i32::from(code) - 0xc8) << 8) + i32::from(low))
        }
        0xd0..=0xd7 => {
            let low = cur.read_u16::<BigEndian>()?;
            Ok(((i32::from(code) - 0xd4) << 16) + i32::from(low))
        }
        b'I' => Ok(cur.read_i32::<BigEndian>()?),
        _ => Err(NetworkError::Fatal(ErrorType::BadTag)),
    }
}

/// Encodes a string with a character-counted length prefix. Only the single
/// chunk forms are emitted; anything longer than 32767 characters fails.
pub fn encode_string(buf: &mut Buffer, s: &str) -> NetworkResult<()> {
    let len = s.chars().count();

    if len > STRING_MAX {
        return Err(NetworkError::Fatal(ErrorType::StringTooLong));
    }

    if len <= 31 {
        buf.append_u8(len as u8);
    } else if len <= 1023 {
        buf.append_u8(0x30 + (len >> 8) as u8);
        buf.append_u8((len & 0xff) as u8);
    } else {
        buf.append_u8(b'S');
        buf.append_u16(len as u16);
    }

    buf.append(s.as_bytes());
    Ok(())
}

/// Decodes a string, concatenating `0x52` continuation chunks until a final
/// chunk is seen. Fails on malformed UTF-8.
pub fn decode_string(cur: &mut Cursor<&[u8]>) -> NetworkResult<String> {
    let mut out = Vec::new();

    loop {
        let code = cur.read_u8()?;

        let (chars, last_chunk) = match code {
            0x00..=0x1f => (usize::from(code), true),
            0x30..=0x33 => {
                let low = cur.read_u8()?;
                ((usize::from(code) - 0x30) * 256 + usize::from(low), true)
            }
            b'S' => (usize::from(cur.read_u16::<BigEndian>()?), true),
            0x52 => (usize::from(cur.read_u16::<BigEndian>()?), false),
            _ => return Err(NetworkError::Fatal(ErrorType::BadTag)),
        };

        copy_utf8_chars(cur, chars, &mut out)?;

        if last_chunk {
            break;
        }
    }

    String::from_utf8(out).map_err(|_| NetworkError::Fatal(ErrorType::Utf8))
}

/// Consumes exactly `count` UTF-8 characters from the cursor by walking the
/// lead-byte widths.
fn copy_utf8_chars(cur: &mut Cursor<&[u8]>, count: usize, out: &mut Vec<u8>) -> NetworkResult<()> {
    let data = *cur.get_ref();
    let mut pos = cur.position() as usize;

    for _ in 0..count {
        let lead = match data.get(pos) {
            Some(&lead) => lead,
            None => return Err(NetworkError::Fatal(ErrorType::Utf8)),
        };

        let width = if lead < 0x80 {
            1
        } else if lead & 0xe0 == 0xc0 {
            2
        } else if lead & 0xf0 == 0xe0 {
            3
        } else if lead & 0xf8 == 0xf0 {
            4
        } else {
            return Err(NetworkError::Fatal(ErrorType::Utf8));
        };

        if pos + width > data.len() {
            return Err(NetworkError::Fatal(ErrorType::Utf8));
        }

        out.extend_from_slice(&data[pos..pos + width]);
        pos += width;
    }

    cur.set_position(pos as u64);
    Ok(())
}

/// Encodes 8-bit data as zero or more maximal `0x41` chunks followed by one
/// final `B` chunk holding the remainder (possibly empty).
pub fn encode_binary(buf: &mut Buffer, data: &[u8]) {
    let mut rest = data;

    while rest.len() > CHUNK_MAX {
        buf.append_u8(0x41);
        buf.append_u16(CHUNK_MAX as u16);
        buf.append(&rest[..CHUNK_MAX]);
        rest = &rest[CHUNK_MAX..];
    }

    buf.append_u8(b'B');
    buf.append_u16(rest.len() as u16);
    buf.append(rest);
}

/// Decodes binary data, concatenating `0x41` chunks until a final chunk
/// (`B` or one of the compact forms) is seen.
pub fn decode_binary(cur: &mut Cursor<&[u8]>) -> NetworkResult<Vec<u8>> {
    let mut out = Vec::new();

    loop {
        let code = cur.read_u8()?;

        let (len, last_chunk) = match code {
            0x20..=0x2f => (usize::from(code) - 0x20, true),
            0x34..=0x37 => {
                let low = cur.read_u8()?;
                ((usize::from(code) - 0x34) * 256 + usize::from(low), true)
            }
            b'B' => (usize::from(cur.read_u16::<BigEndian>()?), true),
            0x41 => (usize::from(cur.read_u16::<BigEndian>()?), false),
            _ => return Err(NetworkError::Fatal(ErrorType::BadTag)),
        };

        let pos = cur.position() as usize;
        let data = *cur.get_ref();
        if pos + len > data.len() {
            return Err(NetworkError::Fatal(ErrorType::BadTag));
        }

        out.extend_from_slice(&data[pos..pos + len]);
        cur.set_position((pos + len) as u64);

        if last_chunk {
            break;
        }
    }

    Ok(out)
}

/// Converts UTF-8 text to pure ASCII by rewriting every non-ASCII code point
/// as a JSON `\uXXXX` escape, splitting code points above U+FFFF into
/// surrogate pairs. Fails on malformed UTF-8.
pub fn utf8_to_ascii(input: &[u8]) -> NetworkResult<String> {
    let text = str::from_utf8(input).map_err(|_| NetworkError::Fatal(ErrorType::Utf8))?;
    let mut out = String::with_capacity(text.len());

    for c in text.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<F: FnOnce(&mut Buffer)>(encode: F) -> Vec<u8> {
        let mut buf = Buffer::new(0);
        encode(&mut buf);
        buf.peek().to_vec()
    }

    #[test]
    fn test_null_roundtrip() {
        let bytes = encoded(encode_null);
        assert_eq!(bytes, [b'N']);

        decode_null(&mut Cursor::new(&bytes[..])).unwrap();
        assert!(decode_null(&mut Cursor::new(&b"X"[..])).is_err());
    }

    #[test]
    fn test_int_exact_encodings() {
        assert_eq!(encoded(|b| encode_int(b, 0)), [0x90]);
        assert_eq!(encoded(|b| encode_int(b, -16)), [0x80]);
        assert_eq!(encoded(|b| encode_int(b, 47)), [0xbf]);
        assert_eq!(encoded(|b| encode_int(b, 48)), [0xc8, 0x30]);
        assert_eq!(encoded(|b| encode_int(b, 2048)), [0xd4, 0x08, 0x00]);
        assert_eq!(
            encoded(|b| encode_int(b, 262144)),
            [0x49, 0x00, 0x04, 0x00, 0x00]
        );
    }

    #[test]
    fn test_int_roundtrip_all_ranges() {
        for &val in &[
            0, 1, -1, -16, 47, -17, 48, -0x800, 0x7ff, -0x801, 0x800, -0x40000, 0x3ffff,
            -0x40001, 0x40000, i32::min_value(), i32::max_value(),
        ] {
            let bytes = encoded(|b| encode_int(b, val));
            let decoded = decode_int(&mut Cursor::new(&bytes[..])).unwrap();
            assert_eq!(decoded, val, "value {}", val);
        }
    }

    #[test]
    fn test_int_bad_tag() {
        assert!(decode_int(&mut Cursor::new(&[0x7f][..])).is_err());
        assert!(decode_int(&mut Cursor::new(&[0xef][..])).is_err());
    }

    #[test]
    fn test_string_short_encoding() {
        let bytes = encoded(|b| encode_string(b, "abc").unwrap());
        assert_eq!(bytes, [0x03, 0x61, 0x62, 0x63]);
    }

    #[test]
    fn test_string_length_classes() {
        let medium: String = "m".repeat(500);
        let bytes = encoded(|b| encode_string(b, &medium).unwrap());
        assert_eq!(bytes[0], 0x30 + (500 >> 8) as u8);
        assert_eq!(bytes[1], (500 & 0xff) as u8);
        assert_eq!(
            decode_string(&mut Cursor::new(&bytes[..])).unwrap(),
            medium
        );

        let long: String = "l".repeat(2000);
        let bytes = encoded(|b| encode_string(b, &long).unwrap());
        assert_eq!(bytes[0], b'S');
        assert_eq!(decode_string(&mut Cursor::new(&bytes[..])).unwrap(), long);

        let mut buf = Buffer::new(0);
        assert!(encode_string(&mut buf, &"x".repeat(0x8000)).is_err());
    }

    #[test]
    fn test_string_char_counted_length() {
        // Three characters, seven bytes.
        let s = "aé😀";
        let bytes = encoded(|b| encode_string(b, s).unwrap());
        assert_eq!(bytes[0], 0x03);
        assert_eq!(bytes.len(), 1 + s.len());
        assert_eq!(decode_string(&mut Cursor::new(&bytes[..])).unwrap(), s);
    }

    #[test]
    fn test_string_continuation_chunks() {
        // 0x52 chunk "he" followed by a final short chunk "llo".
        let bytes = [
            0x52, 0x00, 0x02, b'h', b'e', 0x03, b'l', b'l', b'o',
        ];
        assert_eq!(
            decode_string(&mut Cursor::new(&bytes[..])).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_string_decode_malformed_utf8() {
        let bytes = [0x01, 0xff];
        assert_eq!(
            decode_string(&mut Cursor::new(&bytes[..])).unwrap_err(),
            NetworkError::Fatal(ErrorType::Utf8)
        );

        // Truncated multi-byte character.
        let bytes = [0x01, 0xc3];
        assert!(decode_string(&mut Cursor::new(&bytes[..])).is_err());
    }

    #[test]
    fn test_binary_roundtrip_boundaries() {
        for &len in &[
            0usize, 15, 16, 1023, 1024, 65535, 65536, 131071, 131072,
        ] {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let bytes = encoded(|b| encode_binary(b, &data));
            let decoded = decode_binary(&mut Cursor::new(&bytes[..])).unwrap();
            assert_eq!(decoded, data, "length {}", len);
        }
    }

    #[test]
    fn test_binary_chunk_layout() {
        let bytes = encoded(|b| encode_binary(b, &[5u8; 3]));
        assert_eq!(bytes, [b'B', 0x00, 0x03, 5, 5, 5]);

        let bytes = encoded(|b| encode_binary(b, &vec![1u8; CHUNK_MAX + 1]));
        assert_eq!(bytes[0], 0x41);
        assert_eq!(&bytes[1..3], &[0xff, 0xff]);
        assert_eq!(bytes[3 + CHUNK_MAX], b'B');
        assert_eq!(&bytes[3 + CHUNK_MAX + 1..3 + CHUNK_MAX + 3], &[0x00, 0x01]);
    }

    #[test]
    fn test_binary_compact_forms() {
        let bytes = [0x23, 1, 2, 3];
        assert_eq!(
            decode_binary(&mut Cursor::new(&bytes[..])).unwrap(),
            vec![1, 2, 3]
        );

        let bytes = [0x34, 0x02, 9, 9];
        assert_eq!(
            decode_binary(&mut Cursor::new(&bytes[..])).unwrap(),
            vec![9, 9]
        );
    }

    #[test]
    fn test_utf8_to_ascii() {
        assert_eq!(utf8_to_ascii(b"hello").unwrap(), "hello");
        assert_eq!(
            utf8_to_ascii("héllo".as_bytes()).unwrap(),
            "h\\u00e9llo"
        );
        assert_eq!(
            utf8_to_ascii("😀".as_bytes()).unwrap(),
            "\\ud83d\\ude00"
        );
        assert_eq!(
            utf8_to_ascii(&[0xff, 0xfe]).unwrap_err(),
            NetworkError::Fatal(ErrorType::Utf8)
        );
    }
}
