use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

pub const CRLF: &[u8] = b"\r\n";

/// Every frame that can appear on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Ping,
    Pong,
    Info(Info),
    Connect(Connect),
    Ok,
    Err(ErrorMsg),
    Sub(Subscribe),
    Unsub(Unsubscribe),
    Pub(Publish),
    Msg(Msg),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub payload: String,
}

/// Handshake credentials. Serialized as a JSON object on the CONNECT line.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Connect {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
}

// Keeps passwords out of trace output.
impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connect")
            .field("user", &self.user)
            .field("pass", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub subject: String,
    /// Queue group. `Some("")` is written as no group and decodes as `None`;
    /// [`Subscribe::with_queue`] never produces it.
    pub queue: Option<String>,
    pub sid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub sid: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub subject: String,
    /// `Some("")` is written as no reply subject and decodes as `None`;
    /// [`Publish::with_reply_to`] never produces it.
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

/// A message delivered by the server for subscription `sid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg {
    pub subject: String,
    pub sid: u64,
    /// Never `Some("")` when decoded.
    pub reply_to: Option<String>,
    pub payload: Bytes,
}

impl Packet {
    /// Wire keyword, used for logging.
    pub fn op(&self) -> &'static str {
        match self {
            Packet::Ping => "PING",
            Packet::Pong => "PONG",
            Packet::Info(_) => "INFO",
            Packet::Connect(_) => "CONNECT",
            Packet::Ok => "+OK",
            Packet::Err(_) => "-ERR",
            Packet::Sub(_) => "SUB",
            Packet::Unsub(_) => "UNSUB",
            Packet::Pub(_) => "PUB",
            Packet::Msg(_) => "MSG",
        }
    }

    /// Exact wire bytes of this frame.
    pub fn encode(&self) -> BytesMut {
        let mut dst = BytesMut::new();
        self.encode_into(&mut dst);
        dst
    }

    pub fn encode_into(&self, dst: &mut BytesMut) {
        match self {
            Packet::Ping => dst.put_slice(b"PING\r\n"),
            Packet::Pong => dst.put_slice(b"PONG\r\n"),
            Packet::Ok => dst.put_slice(b"+OK\r\n"),
            Packet::Info(info) => put_line(dst, &["INFO", &info.payload]),
            Packet::Connect(connect) => put_line(dst, &["CONNECT", &connect.to_json()]),
            Packet::Err(err) => {
                let quoted = format!("'{}'", err.message);
                put_line(dst, &["-ERR", &quoted]);
            }
            Packet::Sub(sub) => {
                let sid = sub.sid.to_string();
                match non_empty(&sub.queue) {
                    Some(queue) => put_line(dst, &["SUB", &sub.subject, queue, &sid]),
                    None => put_line(dst, &["SUB", &sub.subject, &sid]),
                }
            }
            Packet::Unsub(unsub) => put_line(dst, &["UNSUB", &unsub.sid.to_string()]),
            Packet::Pub(p) => {
                let len = p.payload.len().to_string();
                match non_empty(&p.reply_to) {
                    Some(reply_to) => put_line(dst, &["PUB", &p.subject, reply_to, &len]),
                    None => put_line(dst, &["PUB", &p.subject, &len]),
                }
                put_payload(dst, &p.payload);
            }
            Packet::Msg(m) => {
                let sid = m.sid.to_string();
                let len = m.payload.len().to_string();
                match non_empty(&m.reply_to) {
                    Some(reply_to) => put_line(dst, &["MSG", &m.subject, &sid, reply_to, &len]),
                    None => put_line(dst, &["MSG", &m.subject, &sid, &len]),
                }
                put_payload(dst, &m.payload);
            }
        }
    }
}

impl Connect {
    pub fn new(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            pass: pass.into(),
        }
    }

    fn to_json(&self) -> String {
        // `preserve_order` keeps keys in insertion order.
        serde_json::json!({
            "verbose": "false",
            "pedantic": "false",
            "user": self.user,
            "pass": self.pass,
        })
        .to_string()
    }
}

impl Publish {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply_to: None,
            payload: payload.into(),
        }
    }

    /// An empty `reply_to` leaves the reply subject unset.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = non_empty_owned(reply_to.into());
        self
    }
}

impl Subscribe {
    pub fn new(subject: impl Into<String>, sid: u64) -> Self {
        Self {
            subject: subject.into(),
            queue: None,
            sid,
        }
    }

    /// An empty `queue` leaves the group unset.
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = non_empty_owned(queue.into());
        self
    }
}

fn non_empty_owned(field: String) -> Option<String> {
    Some(field).filter(|s| !s.is_empty())
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

fn put_line(dst: &mut BytesMut, fields: &[&str]) {
    dst.reserve(fields.iter().map(|f| f.len() + 1).sum::<usize>() + CRLF.len());
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            dst.put_u8(b' ');
        }
        dst.put_slice(field.as_bytes());
    }
    dst.put_slice(CRLF);
}

fn put_payload(dst: &mut BytesMut, payload: &[u8]) {
    dst.reserve(payload.len() + CRLF.len());
    dst.put_slice(payload);
    dst.put_slice(CRLF);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(p: Packet) -> String {
        String::from_utf8(p.encode().to_vec()).unwrap()
    }

    #[test]
    fn fixed_frames() {
        assert_eq!(wire(Packet::Ping), "PING\r\n");
        assert_eq!(wire(Packet::Pong), "PONG\r\n");
        assert_eq!(wire(Packet::Ok), "+OK\r\n");
    }

    #[test]
    fn info_and_err() {
        let info = Packet::Info(Info {
            payload: r#"{"server_id":"abc"}"#.into(),
        });
        assert_eq!(wire(info), "INFO {\"server_id\":\"abc\"}\r\n");

        let err = Packet::Err(ErrorMsg {
            message: "Unknown Protocol Operation".into(),
        });
        assert_eq!(wire(err), "-ERR 'Unknown Protocol Operation'\r\n");
    }

    #[test]
    fn connect_keys_in_order() {
        let connect = Packet::Connect(Connect::new("derek", "s3cr3t"));
        assert_eq!(
            wire(connect),
            "CONNECT {\"verbose\":\"false\",\"pedantic\":\"false\",\"user\":\"derek\",\"pass\":\"s3cr3t\"}\r\n"
        );
    }

    #[test]
    fn connect_escapes_credentials() {
        let connect = Packet::Connect(Connect::new("a\"b", "p w"));
        assert_eq!(
            wire(connect),
            "CONNECT {\"verbose\":\"false\",\"pedantic\":\"false\",\"user\":\"a\\\"b\",\"pass\":\"p w\"}\r\n"
        );
    }

    #[test]
    fn connect_debug_hides_password() {
        let dbg = format!("{:?}", Connect::new("u", "hunter2"));
        assert!(dbg.contains("<redacted>"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn sub_queue_is_optional() {
        let plain = Packet::Sub(Subscribe {
            subject: "foo.*".into(),
            queue: None,
            sid: 7,
        });
        assert_eq!(wire(plain), "SUB foo.* 7\r\n");

        let empty_queue = Packet::Sub(Subscribe {
            subject: "foo.*".into(),
            queue: Some(String::new()),
            sid: 7,
        });
        assert_eq!(wire(empty_queue), "SUB foo.* 7\r\n");

        let grouped = Packet::Sub(Subscribe {
            subject: "foo.*".into(),
            queue: Some("workers".into()),
            sid: 7,
        });
        assert_eq!(wire(grouped), "SUB foo.* workers 7\r\n");
    }

    #[test]
    fn builders_leave_empty_fields_unset() {
        assert_eq!(Publish::new("greet", "hi").with_reply_to("").reply_to, None);
        assert_eq!(Subscribe::new("foo.*", 7).with_queue("").queue, None);
        assert_eq!(
            Subscribe::new("foo.*", 7).with_queue("workers").queue.as_deref(),
            Some("workers")
        );
    }

    #[test]
    fn unsub() {
        assert_eq!(wire(Packet::Unsub(Unsubscribe { sid: 42 })), "UNSUB 42\r\n");
    }

    #[test]
    fn pub_reply_to_is_optional() {
        assert_eq!(
            wire(Packet::Pub(Publish::new("greet", "hello world"))),
            "PUB greet 11\r\nhello world\r\n"
        );
        assert_eq!(
            wire(Packet::Pub(Publish::new("greet", "hi").with_reply_to("inbox.1"))),
            "PUB greet inbox.1 2\r\nhi\r\n"
        );
        assert_eq!(
            wire(Packet::Pub(Publish::new("greet", "hi").with_reply_to(""))),
            "PUB greet 2\r\nhi\r\n"
        );
    }

    #[test]
    fn pub_length_counts_bytes() {
        // "héllo ✓" is 7 chars, 10 bytes
        let encoded = wire(Packet::Pub(Publish::new("s", "héllo ✓")));
        assert_eq!(encoded, "PUB s 10\r\nhéllo ✓\r\n");
    }

    #[test]
    fn empty_payload() {
        assert_eq!(wire(Packet::Pub(Publish::new("s", ""))), "PUB s 0\r\n\r\n");
    }

    #[test]
    fn msg_frames() {
        let msg = Msg {
            subject: "foo.bar".into(),
            sid: 3,
            reply_to: None,
            payload: Bytes::from_static(b"x"),
        };
        assert_eq!(wire(Packet::Msg(msg.clone())), "MSG foo.bar 3 1\r\nx\r\n");

        let with_reply = Msg {
            reply_to: Some("inbox.9".into()),
            ..msg
        };
        assert_eq!(wire(Packet::Msg(with_reply)), "MSG foo.bar 3 inbox.9 1\r\nx\r\n");
    }

    #[test]
    fn every_frame_ends_with_crlf() {
        let packets = [
            Packet::Ping,
            Packet::Pong,
            Packet::Ok,
            Packet::Info(Info { payload: String::new() }),
            Packet::Connect(Connect::new("", "")),
            Packet::Err(ErrorMsg { message: String::new() }),
            Packet::Unsub(Unsubscribe { sid: 1 }),
            Packet::Pub(Publish::new("s", &b"\r\n"[..])),
        ];
        for p in packets {
            assert!(p.encode().ends_with(CRLF), "{} frame missing CRLF", p.op());
        }
    }
}
