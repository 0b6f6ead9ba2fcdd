//! On-disk codec for compiled token vectors.
//!
//! Flat concatenation of tokens, no header, no checksum: one byte of kind,
//! `value1` and `value2` as `u32` little-endian byte length + UTF-8 bytes,
//! then `ref1` and `ref2` as 8-byte little-endian signed integers. Reading
//! stops at the first `Eof` token; anything short of that is corrupt.

use std::io::{self, Read, Write};

use vellum_diagnostics::LoadError;

use crate::{Token, TokenKind};

pub fn write_tokens(w: &mut impl Write, tokens: &[Token]) -> io::Result<()> {
    for tok in tokens {
        w.write_all(&[tok.kind.to_byte()])?;
        write_str(w, &tok.value1)?;
        write_str(w, &tok.value2)?;
        w.write_all(&tok.ref1.to_le_bytes())?;
        w.write_all(&tok.ref2.to_le_bytes())?;
    }
    Ok(())
}

fn write_str(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_all(&(bytes.len() as u32).to_le_bytes())?;
    w.write_all(bytes)
}

pub fn read_tokens(r: &mut impl Read) -> Result<Vec<Token>, LoadError> {
    let mut tokens = Vec::new();
    let mut offset: u64 = 0;
    loop {
        let mut kind_byte = [0u8; 1];
        r.read_exact(&mut kind_byte)
            .map_err(|e| truncated(e, offset))?;
        let kind = TokenKind::from_byte(kind_byte[0]).ok_or_else(|| LoadError::Corrupt {
            offset,
            detail: format!("unknown token kind {}", kind_byte[0]),
        })?;
        offset += 1;

        let value1 = read_str(r, &mut offset)?;
        let value2 = read_str(r, &mut offset)?;
        let ref1 = read_i64(r, &mut offset)?;
        let ref2 = read_i64(r, &mut offset)?;

        tokens.push(Token {
            kind,
            value1,
            value2,
            ref1,
            ref2,
        });
        if kind == TokenKind::Eof {
            return Ok(tokens);
        }
    }
}

fn read_str(r: &mut impl Read, offset: &mut u64) -> Result<String, LoadError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)
        .map_err(|e| truncated(e, *offset))?;
    *offset += 4;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| truncated(e, *offset))?;
    let start = *offset;
    *offset += len as u64;
    String::from_utf8(buf).map_err(|_| LoadError::Corrupt {
        offset: start,
        detail: "string payload is not valid UTF-8".into(),
    })
}

fn read_i64(r: &mut impl Read, offset: &mut u64) -> Result<i64, LoadError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).map_err(|e| truncated(e, *offset))?;
    *offset += 8;
    Ok(i64::from_le_bytes(buf))
}

// Mid-token EOF means the file was cut short; report it as corruption
// rather than a bare I/O error.
fn truncated(e: io::Error, offset: u64) -> LoadError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        LoadError::Corrupt {
            offset,
            detail: "file ends before the Eof token".into(),
        }
    } else {
        LoadError::Io(e)
    }
}

/// One line per token: index, kind, payloads, refs. Debug aid only; the
/// output is not meant to be parsed back.
pub fn dump_tokens(w: &mut impl Write, tokens: &[Token]) -> io::Result<()> {
    for (i, tok) in tokens.iter().enumerate() {
        writeln!(
            w,
            "{:4}  {:<15} value1={:?} value2={:?} ref1={} ref2={}",
            i,
            format!("{:?}", tok.kind),
            tok.value1,
            tok.value2,
            tok.ref1,
            tok.ref2
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UNSET;

    fn sample() -> Vec<Token> {
        vec![
            Token::text(TokenKind::SystemVersion, "0.9.0"),
            Token::text(TokenKind::Content, "Hello, "),
            Token {
                kind: TokenKind::Value,
                value1: "name".into(),
                value2: String::new(),
                ref1: UNSET,
                ref2: crate::ESCAPE_HTML,
            },
            Token::bare(TokenKind::Eof),
        ]
    }

    #[test]
    fn round_trip() {
        let tokens = sample();
        let mut buf = Vec::new();
        write_tokens(&mut buf, &tokens).unwrap();
        let back = read_tokens(&mut buf.as_slice()).unwrap();
        assert_eq!(back, tokens);
    }

    #[test]
    fn reading_stops_at_first_eof() {
        let mut tokens = sample();
        tokens.push(Token::text(TokenKind::Content, "trailing"));
        let mut buf = Vec::new();
        write_tokens(&mut buf, &tokens).unwrap();
        let back = read_tokens(&mut buf.as_slice()).unwrap();
        assert_eq!(back.len(), 4);
        assert_eq!(back.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let mut buf = Vec::new();
        write_tokens(&mut buf, &sample()).unwrap();
        buf.truncate(buf.len() - 3);
        match read_tokens(&mut buf.as_slice()) {
            Err(LoadError::Corrupt { .. }) => {}
            other => panic!("expected Corrupt, got {:?}", other.map(|t| t.len())),
        }
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let buf = vec![0xEEu8];
        match read_tokens(&mut buf.as_slice()) {
            Err(LoadError::Corrupt { offset: 0, .. }) => {}
            other => panic!("expected Corrupt at 0, got {:?}", other.map(|t| t.len())),
        }
    }
}
