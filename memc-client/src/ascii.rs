//! # Memcache ASCII Encoding and Parsing
//!
//! Purpose: Encode client requests and parse server replies for the memcache
//! text protocol without extra dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Fixed Grammar**: Each request knows which reply shape follows it; the
//!    readers below accept exactly that shape and nothing else.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Data blocks are length-delimited and read as raw bytes.
//! 4. **Fail Fast**: Anything outside the grammar becomes a protocol error that
//!    carries the offending line.
//!
//! ## Wire Shapes
//!
//! ```text
//! set|add|replace <key> <flags> <exptime> <bytes>\r\n<data>\r\n
//!     -> STORED | NOT_STORED
//! get <key>*\r\n
//!     -> (VALUE <key> <flags> <bytes>[ <cas>]\r\n<data>\r\n)* END
//! incr|decr <key> <delta>\r\n   -> <number> | NOT_FOUND
//! delete <key>\r\n              -> DELETED | NOT_FOUND
//! stats\r\n                     -> (STAT <name> <value>\r\n)* END
//! flush_all\r\n                 -> OK
//! version\r\n                   -> VERSION <text>
//! ```

use std::fmt;
use std::io::{BufRead, Read};

use bytes::Bytes;
use memc_common::{Item, StatsSnapshot, StoreMode};

use crate::error::{ClientError, ClientResult, SERVER_ERROR_REASON};

/// Longest reply line accepted before the reply is treated as garbage.
pub const MAX_LINE_LEN: usize = 8192;

/// Largest data block a `VALUE` header may announce (256 MiB).
pub const MAX_VALUE_LEN: usize = 1 << 28;

/// A request in the text protocol.
///
/// Keys are validated by the caller; encoding writes them verbatim.
#[derive(Debug, Clone, Copy)]
pub enum Request<'a> {
    Store {
        mode: StoreMode,
        key: &'a [u8],
        flags: u32,
        exptime: u32,
        value: &'a [u8],
    },
    Get {
        keys: &'a [&'a [u8]],
    },
    Incr {
        key: &'a [u8],
        delta: u64,
    },
    Decr {
        key: &'a [u8],
        delta: u64,
    },
    Delete {
        key: &'a [u8],
    },
    Stats,
    FlushAll,
    Version,
    Quit,
}

impl Request<'_> {
    /// Command verb, used for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Store { mode, .. } => mode.verb(),
            Request::Get { .. } => "get",
            Request::Incr { .. } => "incr",
            Request::Decr { .. } => "decr",
            Request::Delete { .. } => "delete",
            Request::Stats => "stats",
            Request::FlushAll => "flush_all",
            Request::Version => "version",
            Request::Quit => "quit",
        }
    }

    /// Appends the encoded request to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match *self {
            Request::Store {
                mode,
                key,
                flags,
                exptime,
                value,
            } => {
                out.extend_from_slice(mode.verb().as_bytes());
                out.push(b' ');
                out.extend_from_slice(key);
                out.push(b' ');
                push_u64(out, u64::from(flags));
                out.push(b' ');
                push_u64(out, u64::from(exptime));
                out.push(b' ');
                push_u64(out, value.len() as u64);
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(value);
                out.extend_from_slice(b"\r\n");
            }
            Request::Get { keys } => {
                out.extend_from_slice(b"get");
                for key in keys {
                    out.push(b' ');
                    out.extend_from_slice(key);
                }
                out.extend_from_slice(b"\r\n");
            }
            Request::Incr { key, delta } | Request::Decr { key, delta } => {
                out.extend_from_slice(self.name().as_bytes());
                out.push(b' ');
                out.extend_from_slice(key);
                out.push(b' ');
                push_u64(out, delta);
                out.extend_from_slice(b"\r\n");
            }
            Request::Delete { key } => {
                out.extend_from_slice(b"delete ");
                out.extend_from_slice(key);
                out.extend_from_slice(b"\r\n");
            }
            Request::Stats | Request::FlushAll | Request::Version | Request::Quit => {
                out.extend_from_slice(self.name().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
        }
    }
}

/// Single-line reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Stored,
    NotStored,
    NotFound,
    Deleted,
    Ok,
    /// Result of `incr`/`decr`.
    Number(u64),
    Version(String),
}

// Renders the status as it appeared on the wire, for diagnostics.
impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Stored => f.write_str("STORED"),
            Status::NotStored => f.write_str("NOT_STORED"),
            Status::NotFound => f.write_str("NOT_FOUND"),
            Status::Deleted => f.write_str("DELETED"),
            Status::Ok => f.write_str("OK"),
            Status::Number(value) => write!(f, "{}", value),
            Status::Version(text) => write!(f, "VERSION {}", text),
        }
    }
}

impl Status {
    /// Protocol error for a well-formed status the command does not allow.
    pub fn unexpected(&self) -> ClientError {
        ClientError::protocol("unexpected reply", self.to_string().as_bytes())
    }
}

/// Reads one single-line reply.
pub fn read_status<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Status> {
    read_line(reader, line_buf)?;
    let line = line_buf.as_slice();

    let status = match line {
        b"STORED" => Status::Stored,
        b"NOT_STORED" => Status::NotStored,
        b"NOT_FOUND" => Status::NotFound,
        b"DELETED" => Status::Deleted,
        b"OK" => Status::Ok,
        _ if line.starts_with(b"VERSION ") => {
            Status::Version(String::from_utf8_lossy(&line[8..]).trim().to_string())
        }
        _ if is_error_line(line) => return Err(ClientError::protocol(SERVER_ERROR_REASON, line)),
        // Some servers pad incr/decr results with trailing spaces.
        _ => match parse_u64(trim_trailing_spaces(line)) {
            Some(value) => Status::Number(value),
            None => return Err(ClientError::protocol("unexpected reply", line)),
        },
    };
    Ok(status)
}

/// Reads `VALUE` blocks up to the terminating `END`.
pub fn read_values<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<Vec<Item>> {
    let mut items = Vec::new();
    loop {
        read_line(reader, line_buf)?;
        if line_buf.as_slice() == b"END" {
            return Ok(items);
        }
        if is_error_line(line_buf) {
            return Err(ClientError::protocol(SERVER_ERROR_REASON, line_buf));
        }
        if !line_buf.starts_with(b"VALUE ") {
            return Err(ClientError::protocol("unexpected reply", line_buf));
        }

        let (key, flags, len) = parse_value_header(line_buf)?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(ClientError::protocol("missing data terminator", &crlf));
        }

        items.push(Item {
            key,
            flags,
            data: Bytes::from(data),
        });
    }
}

/// Reads `STAT` lines up to the terminating `END`.
pub fn read_stats<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<StatsSnapshot> {
    let mut stats = StatsSnapshot::new();
    loop {
        read_line(reader, line_buf)?;
        if line_buf.as_slice() == b"END" {
            return Ok(stats);
        }
        if is_error_line(line_buf) {
            return Err(ClientError::protocol(SERVER_ERROR_REASON, line_buf));
        }

        let entry = line_buf
            .strip_prefix(b"STAT ")
            .and_then(|rest| {
                let split = rest.iter().position(|&b| b == b' ')?;
                Some((&rest[..split], &rest[split + 1..]))
            })
            .filter(|(name, _)| !name.is_empty());
        match entry {
            Some((name, value)) => stats.insert(
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(value).into_owned(),
            ),
            None => return Err(ClientError::protocol("malformed STAT line", line_buf)),
        }
    }
}

/// Parses `VALUE <key> <flags> <bytes>[ <cas>]`.
fn parse_value_header(line: &[u8]) -> ClientResult<(Bytes, u32, usize)> {
    let malformed = || ClientError::protocol("malformed VALUE header", line);

    let mut fields = line.split(|&b| b == b' ').filter(|field| !field.is_empty());
    let _verb = fields.next();
    let key = fields.next().ok_or_else(malformed)?;
    let flags = fields
        .next()
        .and_then(parse_u64)
        .and_then(|flags| u32::try_from(flags).ok())
        .ok_or_else(malformed)?;
    let len = fields
        .next()
        .and_then(parse_u64)
        .and_then(|len| usize::try_from(len).ok())
        .filter(|&len| len <= MAX_VALUE_LEN)
        .ok_or_else(malformed)?;
    if let Some(cas) = fields.next() {
        parse_u64(cas).ok_or_else(malformed)?;
    }
    if fields.next().is_some() {
        return Err(malformed());
    }

    Ok((Bytes::copy_from_slice(key), flags, len))
}

fn is_error_line(line: &[u8]) -> bool {
    line == b"ERROR"
        || line.starts_with(b"ERROR ")
        || line.starts_with(b"CLIENT_ERROR")
        || line.starts_with(b"SERVER_ERROR")
}

/// Reads one CRLF-terminated line into `buf`, without the terminator.
fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    let bytes = reader
        .by_ref()
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(ClientError::protocol("connection closed", b""));
    }
    if buf.last() != Some(&b'\n') {
        if bytes == MAX_LINE_LEN {
            return Err(ClientError::protocol("line too long", &buf[..64]));
        }
        return Err(ClientError::protocol("connection closed mid-line", buf));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::protocol("malformed line", buf));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn trim_trailing_spaces(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != b' ').map_or(0, |idx| idx + 1);
    &data[..end]
}

/// Parses an unsigned decimal, rejecting empty input, signs and overflow.
fn parse_u64(data: &[u8]) -> Option<u64> {
    if data.is_empty() {
        return None;
    }
    let mut value: u64 = 0;
    for &b in data {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add(u64::from(b - b'0'))?;
    }
    Some(value)
}

fn push_u64(out: &mut Vec<u8>, mut value: u64) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded(request: Request<'_>) -> Vec<u8> {
        let mut buf = Vec::new();
        request.encode(&mut buf);
        buf
    }

    #[test]
    fn encodes_storage_commands() {
        let request = Request::Store {
            mode: StoreMode::Add,
            key: b"00000001",
            flags: 0,
            exptime: 180,
            value: b"1",
        };
        assert_eq!(encoded(request), b"add 00000001 0 180 1\r\n1\r\n");

        let request = Request::Store {
            mode: StoreMode::Replace,
            key: b"k",
            flags: 42,
            exptime: 0,
            value: b"a\r\nb",
        };
        assert_eq!(encoded(request), b"replace k 42 0 4\r\na\r\nb\r\n");
    }

    #[test]
    fn encodes_line_commands() {
        assert_eq!(encoded(Request::Get { keys: &[&b"a"[..], &b"b"[..]] }), b"get a b\r\n");
        assert_eq!(encoded(Request::Incr { key: b"n", delta: 1 }), b"incr n 1\r\n");
        assert_eq!(
            encoded(Request::Decr { key: b"n", delta: u64::MAX }),
            b"decr n 18446744073709551615\r\n"
        );
        assert_eq!(encoded(Request::Delete { key: b"n" }), b"delete n\r\n");
        assert_eq!(encoded(Request::Stats), b"stats\r\n");
        assert_eq!(encoded(Request::FlushAll), b"flush_all\r\n");
        assert_eq!(encoded(Request::Quit), b"quit\r\n");
    }

    #[test]
    fn parses_status_tokens() {
        let mut reader = Cursor::new(b"STORED\r\nNOT_STORED\r\nDELETED\r\nNOT_FOUND\r\nOK\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::Stored);
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::NotStored);
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::Deleted);
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::NotFound);
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::Ok);
    }

    #[test]
    fn parses_numbers_and_version() {
        let mut reader = Cursor::new(b"6\r\n12   \r\nVERSION 1.6.21\r\n".to_vec());
        let mut line = Vec::new();
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::Number(6));
        assert_eq!(read_status(&mut reader, &mut line).unwrap(), Status::Number(12));
        assert_eq!(
            read_status(&mut reader, &mut line).unwrap(),
            Status::Version("1.6.21".to_string())
        );
    }

    #[test]
    fn server_error_lines_are_protocol_errors() {
        let mut reader = Cursor::new(
            b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n".to_vec(),
        );
        let mut line = Vec::new();
        let err = read_status(&mut reader, &mut line).unwrap_err();
        assert_eq!(
            err.server_message(),
            Some("CLIENT_ERROR cannot increment or decrement non-numeric value")
        );
    }

    #[test]
    fn rejects_garbage_status() {
        let mut reader = Cursor::new(b"HELLO\r\n".to_vec());
        let mut line = Vec::new();
        match read_status(&mut reader, &mut line).unwrap_err() {
            ClientError::Protocol { line, .. } => assert_eq!(line, "HELLO"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_overflowing_number() {
        let mut reader = Cursor::new(b"18446744073709551616\r\n".to_vec());
        let mut line = Vec::new();
        assert!(read_status(&mut reader, &mut line).is_err());
    }

    #[test]
    fn requires_crlf() {
        let mut reader = Cursor::new(b"STORED\n".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_status(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "malformed line", .. })
        ));
    }

    #[test]
    fn eof_is_protocol_error() {
        let mut reader = Cursor::new(b"STOR".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_status(&mut reader, &mut line),
            Err(ClientError::Protocol { .. })
        ));
    }

    #[test]
    fn parses_value_blocks() {
        let mut reader = Cursor::new(
            b"VALUE foo 0 3\r\nbar\r\nVALUE baz 7 4 99999\r\nq\r\nx\r\nEND\r\n".to_vec(),
        );
        let mut line = Vec::new();
        let items = read_values(&mut reader, &mut line).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key.as_ref(), b"foo");
        assert_eq!(items[0].data.as_ref(), b"bar");
        assert_eq!(items[1].flags, 7);
        assert_eq!(items[1].data.as_ref(), b"q\r\nx");
    }

    #[test]
    fn empty_end_is_miss() {
        let mut reader = Cursor::new(b"END\r\n".to_vec());
        let mut line = Vec::new();
        assert!(read_values(&mut reader, &mut line).unwrap().is_empty());
    }

    #[test]
    fn truncated_value_is_protocol_error() {
        let mut reader = Cursor::new(b"VALUE foo 0 10\r\nbar".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_values(&mut reader, &mut line),
            Err(ClientError::Protocol { .. })
        ));
    }

    #[test]
    fn malformed_value_header() {
        let mut reader = Cursor::new(b"VALUE foo zero 3\r\nbar\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_values(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "malformed VALUE header", .. })
        ));
    }

    #[test]
    fn oversized_value_length_is_rejected() {
        let mut reader = Cursor::new(b"VALUE k 0 18446744073709551615\r\nx\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        match read_values(&mut reader, &mut line) {
            Err(ClientError::Protocol { reason, line }) => {
                assert_eq!(reason, "malformed VALUE header");
                assert_eq!(line, "VALUE k 0 18446744073709551615");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let header = format!("VALUE k 0 {}\r\n", MAX_VALUE_LEN + 1);
        let mut reader = Cursor::new(header.into_bytes());
        assert!(matches!(
            read_values(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "malformed VALUE header", .. })
        ));
    }

    #[test]
    fn exists_is_not_a_known_status() {
        let mut reader = Cursor::new(b"EXISTS\r\n".to_vec());
        let mut line = Vec::new();
        match read_status(&mut reader, &mut line).unwrap_err() {
            ClientError::Protocol { reason, line } => {
                assert_eq!(reason, "unexpected reply");
                assert_eq!(line, "EXISTS");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parses_stats_until_end() {
        let mut reader = Cursor::new(
            b"STAT pid 42\r\nSTAT curr_items 10\r\nSTAT version KyotoTycoon/0.9.56\r\nEND\r\n".to_vec(),
        );
        let mut line = Vec::new();
        let stats = read_stats(&mut reader, &mut line).unwrap();
        assert_eq!(stats.curr_items(), Some(10));
        assert_eq!(stats.get("version"), Some("KyotoTycoon/0.9.56"));
        assert_eq!(stats.len(), 3);
    }

    #[test]
    fn stats_without_end_fails() {
        let mut reader = Cursor::new(b"STAT pid 42\r\nSTAT curr_items 10\r\n".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_stats(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "connection closed", .. })
        ));
    }

    #[test]
    fn stats_rejects_foreign_lines() {
        let mut reader = Cursor::new(b"STAT pid 42\r\nSTORED\r\nEND\r\n".to_vec());
        let mut line = Vec::new();
        assert!(matches!(
            read_stats(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "malformed STAT line", .. })
        ));
    }

    #[test]
    fn rejects_overlong_line() {
        let mut data = vec![b'A'; MAX_LINE_LEN + 10];
        data.extend_from_slice(b"\r\n");
        let mut reader = Cursor::new(data);
        let mut line = Vec::new();
        assert!(matches!(
            read_status(&mut reader, &mut line),
            Err(ClientError::Protocol { reason: "line too long", .. })
        ));
    }
}
