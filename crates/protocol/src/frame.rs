use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    ProtocolError,
    helper::{parse_len, parse_sid, split_op, unquote},
    packet::*,
};

pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;
pub const DEFAULT_MAX_PAYLOAD: usize = 1024 * 1024;

/// Streaming codec for the text protocol.
///
/// Control lines are terminated by `\r\n` (a bare `\n` is tolerated).
/// `PUB` and `MSG` lines announce a byte length; that many payload bytes
/// follow, then another `\r\n`. The decoder keeps the parsed header between
/// calls while the payload is still arriving.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_length: usize,
    max_payload: usize,
    // where to resume the newline scan on the next call
    next_index: usize,
    pending: Option<PayloadHeader>,
}

#[derive(Debug, Clone)]
enum PayloadHeader {
    Pub {
        subject: String,
        reply_to: Option<String>,
        len: usize,
    },
    Msg {
        subject: String,
        sid: u64,
        reply_to: Option<String>,
        len: usize,
    },
}

enum Line {
    Complete(Packet),
    NeedsPayload(PayloadHeader),
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_LINE_LENGTH, DEFAULT_MAX_PAYLOAD)
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_line_length: usize, max_payload: usize) -> Self {
        Self {
            max_line_length,
            max_payload,
            next_index: 0,
            pending: None,
        }
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn next_line(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, ProtocolError> {
        let newline = src[self.next_index..].iter().position(|b| *b == b'\n');

        let Some(offset) = newline else {
            if src.len() > self.max_line_length + CRLF.len() {
                return Err(ProtocolError::LineTooLong {
                    max: self.max_line_length,
                });
            }
            self.next_index = src.len();
            return Ok(None);
        };

        let end = self.next_index + offset;
        self.next_index = 0;

        let mut line = src.split_to(end + 1);
        line.truncate(end);
        if line.last() == Some(&b'\r') {
            line.truncate(end - 1);
        }
        if line.len() > self.max_line_length {
            return Err(ProtocolError::LineTooLong {
                max: self.max_line_length,
            });
        }
        Ok(Some(line))
    }

    fn parse_line(&self, raw: &[u8]) -> Result<Line, ProtocolError> {
        let line = std::str::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8)?;
        let (op, rest) = split_op(line);
        let op = op.to_ascii_uppercase();

        let tokens: Vec<&str> = line.split_ascii_whitespace().collect();
        let malformed = |op: &'static str| ProtocolError::Malformed {
            op,
            line: line.to_owned(),
        };

        let packet = match op.as_str() {
            "PING" | "PONG" | "+OK" => {
                let packet = match op.as_str() {
                    "PING" => Packet::Ping,
                    "PONG" => Packet::Pong,
                    _ => Packet::Ok,
                };
                if tokens.len() != 1 {
                    return Err(malformed(packet.op()));
                }
                packet
            }
            "INFO" => Packet::Info(Info {
                payload: rest.to_owned(),
            }),
            "-ERR" => Packet::Err(ErrorMsg {
                message: unquote(rest.trim()).to_owned(),
            }),
            "CONNECT" => Packet::Connect(serde_json::from_str(rest)?),
            "SUB" => match tokens.as_slice() {
                [_, subject, sid] => Packet::Sub(Subscribe {
                    subject: (*subject).to_owned(),
                    queue: None,
                    sid: parse_sid(sid)?,
                }),
                [_, subject, queue, sid] => Packet::Sub(Subscribe {
                    subject: (*subject).to_owned(),
                    queue: Some((*queue).to_owned()),
                    sid: parse_sid(sid)?,
                }),
                _ => return Err(malformed("SUB")),
            },
            "UNSUB" => match tokens.as_slice() {
                [_, sid] => Packet::Unsub(Unsubscribe {
                    sid: parse_sid(sid)?,
                }),
                _ => return Err(malformed("UNSUB")),
            },
            "PUB" => {
                let header = match tokens.as_slice() {
                    [_, subject, len] => PayloadHeader::Pub {
                        subject: (*subject).to_owned(),
                        reply_to: None,
                        len: parse_len(len)?,
                    },
                    [_, subject, reply_to, len] => PayloadHeader::Pub {
                        subject: (*subject).to_owned(),
                        reply_to: Some((*reply_to).to_owned()),
                        len: parse_len(len)?,
                    },
                    _ => return Err(malformed("PUB")),
                };
                return Ok(Line::NeedsPayload(header));
            }
            "MSG" => {
                let header = match tokens.as_slice() {
                    [_, subject, sid, len] => PayloadHeader::Msg {
                        subject: (*subject).to_owned(),
                        sid: parse_sid(sid)?,
                        reply_to: None,
                        len: parse_len(len)?,
                    },
                    [_, subject, sid, reply_to, len] => PayloadHeader::Msg {
                        subject: (*subject).to_owned(),
                        sid: parse_sid(sid)?,
                        reply_to: Some((*reply_to).to_owned()),
                        len: parse_len(len)?,
                    },
                    _ => return Err(malformed("MSG")),
                };
                return Ok(Line::NeedsPayload(header));
            }
            _ => return Err(ProtocolError::UnknownOp(op.clone())),
        };

        Ok(Line::Complete(packet))
    }
}

impl PayloadHeader {
    fn len(&self) -> usize {
        match self {
            PayloadHeader::Pub { len, .. } | PayloadHeader::Msg { len, .. } => *len,
        }
    }

    fn into_packet(self, payload: Bytes) -> Packet {
        match self {
            PayloadHeader::Pub {
                subject, reply_to, ..
            } => Packet::Pub(Publish {
                subject,
                reply_to,
                payload,
            }),
            PayloadHeader::Msg {
                subject,
                sid,
                reply_to,
                ..
            } => Packet::Msg(Msg {
                subject,
                sid,
                reply_to,
                payload,
            }),
        }
    }
}

impl Decoder for LineCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        let header = match self.pending.take() {
            Some(header) => header,
            None => {
                let Some(line) = self.next_line(src)? else {
                    return Ok(None);
                };
                match self.parse_line(&line)? {
                    Line::Complete(packet) => return Ok(Some(packet)),
                    Line::NeedsPayload(header) => {
                        if header.len() > self.max_payload {
                            return Err(ProtocolError::PayloadTooLarge {
                                len: header.len(),
                                max: self.max_payload,
                            });
                        }
                        header
                    }
                }
            }
        };

        let frame_len = header.len() + CRLF.len();
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(header.len()).freeze();
        let terminator = src.split_to(CRLF.len());
        if &terminator[..] != CRLF {
            return Err(ProtocolError::MissingPayloadTerminator);
        }

        Ok(Some(header.into_packet(payload)))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(ProtocolError::Truncated {
                buffered: buf.len(),
            }),
        }
    }
}

impl Encoder<Packet> for LineCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        item.encode_into(dst);
        Ok(())
    }
}
