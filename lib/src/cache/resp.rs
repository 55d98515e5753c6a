//! Minimal RESP (REdis Serialization Protocol) codec: commands out, replies in.

use std::io::{self, BufRead, Read};

/// Largest bulk string a server may send.
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
  Status(String),
  Error(String),
  Integer(i64),
  /// `None` is the nil bulk string (`$-1`).
  Bulk(Option<Vec<u8>>),
  Array(Option<Vec<Reply>>),
}

/// Encodes a command as an array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
  let mut out = format!("*{}\r\n", args.len()).into_bytes();
  for arg in args {
    out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
    out.extend_from_slice(arg);
    out.extend_from_slice(b"\r\n");
  }
  out
}

pub fn read_reply<R: BufRead>(r: &mut R) -> io::Result<Reply> {
  let line = read_line(r)?;
  let (kind, rest) = line.split_at(1);
  match kind {
    "+" => Ok(Reply::Status(rest.to_string())),
    "-" => Ok(Reply::Error(rest.to_string())),
    ":" => Ok(Reply::Integer(parse_int(rest)?)),
    "$" => match parse_int(rest)? {
      -1 => Ok(Reply::Bulk(None)),
      len => {
        let len = usize::try_from(len)
          .ok()
          .filter(|&l| l <= MAX_BULK_LEN)
          .ok_or_else(|| invalid(format!("bad bulk length {}", len)))?;
        let mut data = vec![0; len];
        r.read_exact(&mut data)?;
        let mut crlf = [0; 2];
        r.read_exact(&mut crlf)?;
        if &crlf != b"\r\n" {
          return Err(invalid("bulk string not terminated by CRLF"));
        }
        Ok(Reply::Bulk(Some(data)))
      }
    },
    "*" => match parse_int(rest)? {
      -1 => Ok(Reply::Array(None)),
      n if n < 0 => Err(invalid(format!("bad array length {}", n))),
      n => (0..n).map(|_| read_reply(r)).collect::<io::Result<Vec<_>>>().map(|v| Reply::Array(Some(v))),
    },
    other => Err(invalid(format!("unknown reply type {:?}", other))),
  }
}

fn read_line<R: BufRead>(r: &mut R) -> io::Result<String> {
  let mut buf = Vec::new();
  if r.read_until(b'\n', &mut buf)? == 0 {
    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
  }
  if !buf.ends_with(b"\r\n") || buf.len() < 3 {
    return Err(invalid("reply line not terminated by CRLF"));
  }
  buf.truncate(buf.len() - 2);
  String::from_utf8(buf).map_err(|_| invalid("reply line is not utf-8"))
}

fn parse_int(s: &str) -> io::Result<i64> {
  s.parse().map_err(|_| invalid(format!("bad integer {:?}", s)))
}

fn invalid(msg: impl Into<String>) -> io::Error {
  io::Error::new(io::ErrorKind::InvalidData, msg.into())
}
