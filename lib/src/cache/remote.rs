use std::{
  io::{self, BufReader, Write},
  net::{TcpStream, ToSocketAddrs},
  sync::{Mutex, PoisonError},
  time::Duration,
};

use tracing::{debug, warn};

use super::{
  resp::{encode_command, read_reply, Reply},
  Cache,
};
use crate::{Error, Result};

/// Client for a RESP speaking key-value service.
///
/// One connection is shared by all callers. A failed exchange drops it and the next call dials
/// again.
#[derive(Debug)]
pub struct RemoteCache {
  addr: String,
  timeout: Duration,
  conn: Mutex<Option<Connection>>,
}

#[derive(Debug)]
struct Connection {
  reader: BufReader<TcpStream>,
  writer: TcpStream,
}

impl Connection {
  fn open(addr: &str, timeout: Duration) -> io::Result<Self> {
    let target = addr
      .to_socket_addrs()?
      .next()
      .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", addr)))?;
    let stream = TcpStream::connect_timeout(&target, timeout)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;
    stream.set_nodelay(true)?;
    Ok(Self {
      reader: BufReader::new(stream.try_clone()?),
      writer: stream,
    })
  }

  fn call(&mut self, args: &[&[u8]]) -> io::Result<Reply> {
    self.writer.write_all(&encode_command(args))?;
    self.writer.flush()?;
    read_reply(&mut self.reader)
  }
}

impl RemoteCache {
  /// Dials `addr` right away so an unreachable service is reported at startup.
  pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
    let conn = Connection::open(addr, timeout).map_err(|e| unavailable(addr, e))?;
    debug!(addr, "connected to cache");
    Ok(Self {
      addr: addr.to_string(),
      timeout,
      conn: Mutex::new(Some(conn)),
    })
  }

  pub fn addr(&self) -> &str {
    &self.addr
  }

  pub fn ping(&self) -> Result<()> {
    match self.call(&[b"PING"])? {
      Reply::Status(s) if s == "PONG" => Ok(()),
      other => Err(self.unexpected("PING", other)),
    }
  }

  fn call(&self, args: &[&[u8]]) -> Result<Reply> {
    let mut slot = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
    let mut conn = match slot.take() {
      Some(conn) => conn,
      None => Connection::open(&self.addr, self.timeout).map_err(|e| unavailable(&self.addr, e))?,
    };
    match conn.call(args) {
      Ok(Reply::Error(msg)) => {
        *slot = Some(conn);
        Err(Error::CacheUnavailable(format!("{} replied with error: {}", self.addr, msg)))
      }
      Ok(reply) => {
        *slot = Some(conn);
        Ok(reply)
      }
      Err(err) => {
        warn!(addr = %self.addr, %err, "cache connection failed, will reconnect");
        Err(unavailable(&self.addr, err))
      }
    }
  }

  fn unexpected(&self, command: &str, reply: Reply) -> Error {
    Error::CacheUnavailable(format!("{} sent unexpected reply to {}: {:?}", self.addr, command, reply))
  }
}

impl Cache for RemoteCache {
  fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
    match self.call(&[b"GET", key.as_bytes()])? {
      Reply::Bulk(value) => Ok(value),
      other => Err(self.unexpected("GET", other)),
    }
  }

  fn put(&self, key: &str, value: &[u8]) -> Result<()> {
    match self.call(&[b"SET", key.as_bytes(), value])? {
      Reply::Status(s) if s == "OK" => Ok(()),
      other => Err(self.unexpected("SET", other)),
    }
  }

  fn delete(&self, key: &str) -> Result<()> {
    match self.call(&[b"DEL", key.as_bytes()])? {
      Reply::Integer(_) => Ok(()),
      other => Err(self.unexpected("DEL", other)),
    }
  }

  fn backend(&self) -> &'static str {
    "remote"
  }
}

fn unavailable(addr: &str, err: io::Error) -> Error {
  Error::CacheUnavailable(format!("{}: {}", addr, err))
}

#[cfg(test)]
pub(crate) mod tests {
  use std::{
    collections::HashMap,
    io::{BufReader, Write},
    net::TcpListener,
    thread,
  };

  use super::*;

  fn bulk(reply: Reply) -> Vec<u8> {
    match reply {
      Reply::Bulk(Some(b)) => b,
      other => panic!("expected bulk string, got {:?}", other),
    }
  }

  /// Serves connections one after another from a shared map. With `one_shot` every connection
  /// is closed after its first command.
  pub(crate) fn spawn_fake_server(one_shot: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
      let mut store: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();
      for stream in listener.incoming() {
        let Ok(mut writer) = stream else { break };
        let mut reader = BufReader::new(writer.try_clone().unwrap());
        loop {
          let args: Vec<Vec<u8>> = match read_reply(&mut reader) {
            Ok(Reply::Array(Some(items))) => items.into_iter().map(bulk).collect(),
            _ => break,
          };
          let out: Vec<u8> = match args[0].as_slice() {
            b"PING" => b"+PONG\r\n".to_vec(),
            b"GET" => match store.get(&args[1]) {
              Some(v) => [format!("${}\r\n", v.len()).into_bytes(), v.clone(), b"\r\n".to_vec()].concat(),
              None => b"$-1\r\n".to_vec(),
            },
            b"SET" => {
              store.insert(args[1].clone(), args[2].clone());
              b"+OK\r\n".to_vec()
            }
            b"DEL" => format!(":{}\r\n", store.remove(&args[1]).map_or(0, |_| 1)).into_bytes(),
            _ => b"-ERR unknown command\r\n".to_vec(),
          };
          if writer.write_all(&out).is_err() || one_shot {
            break;
          }
        }
      }
    });
    addr
  }

  #[test]
  fn test_get_put_delete() {
    let addr = spawn_fake_server(false);
    let cache = RemoteCache::connect(&addr, Duration::from_secs(2)).unwrap();
    cache.ping().unwrap();
    assert_eq!(cache.get("missing").unwrap(), None);
    cache.put("k", b"{\"a\":1}").unwrap();
    cache.put("k", b"\r\nbinary\0").unwrap();
    assert_eq!(cache.get("k").unwrap(), Some(b"\r\nbinary\0".to_vec()));
    cache.delete("k").unwrap();
    assert_eq!(cache.get("k").unwrap(), None);
    assert_eq!(cache.addr(), addr);
  }

  #[test]
  fn test_reconnects_after_dropped_connection() {
    let addr = spawn_fake_server(true);
    let cache = RemoteCache::connect(&addr, Duration::from_secs(2)).unwrap();
    cache.put("k", b"v").unwrap();
    // the server hung up after answering
    assert!(matches!(cache.get("k"), Err(Error::CacheUnavailable(_))));
    assert_eq!(cache.get("k").unwrap(), Some(b"v".to_vec()));
  }

  #[test]
  fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    assert!(matches!(
      RemoteCache::connect(&addr, Duration::from_millis(200)),
      Err(Error::CacheUnavailable(_))
    ));
  }
}
