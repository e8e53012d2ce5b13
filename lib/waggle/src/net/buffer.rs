//! Read-side byte accumulator. Frames may arrive fragmented across many
//! reads or coalesced within one; the buffer absorbs both by appending
//! whatever the socket yields and letting the framing layer consume exact
//! frame boundaries.

use crate::net::support::{ErrorType, NetError, NetResult};
use byteorder::{BigEndian, ByteOrder};
use std::io;

/// Bytes requested from the socket per ingress call.
const READ_CHUNK: usize = 4096;

/// Compact once this much dead space accumulates at the front.
const COMPACT_THRESHOLD: usize = 16384;

pub struct Buffer {
    data: Vec<u8>,
    head: usize,
    limit: usize,
}

impl Buffer {
    /// `limit` bounds the unconsumed bytes the buffer will hold; a frame
    /// larger than the limit can never complete and surfaces as an overrun.
    pub fn new(limit: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(READ_CHUNK),
            head: 0,
            limit,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() - self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unconsumed bytes.
    #[inline]
    pub fn read_slice(&self) -> &[u8] {
        &self.data[self.head..]
    }

    /// Drops `count` bytes from the front.
    #[inline]
    pub fn consume(&mut self, count: usize) {
        assert!(count <= self.len(), "consumed past the buffered data");
        self.head += count;
        if self.head >= COMPACT_THRESHOLD {
            self.compact();
        }
    }

    /// Performs one read from `reader` into the buffer. Returns the number
    /// of bytes read; zero means end of stream.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.len() >= self.limit {
            return Err(io::Error::new(io::ErrorKind::Other, "read buffer overrun"));
        }
        if self.head == self.data.len() {
            self.compact();
        }

        let want = READ_CHUNK.min(self.limit - self.len());
        let old_len = self.data.len();
        self.data.resize(old_len + want, 0);
        match reader.read(&mut self.data[old_len..]) {
            Ok(count) => {
                self.data.truncate(old_len + count);
                Ok(count)
            }
            Err(err) => {
                self.data.truncate(old_len);
                Err(err)
            }
        }
    }

    fn compact(&mut self) {
        self.data.drain(..self.head);
        self.head = 0;
    }
}

/// Width of the length prefix for the link's current mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Framing {
    U16,
    U32,
}

impl Framing {
    #[inline]
    fn header_size(self) -> usize {
        match self {
            Framing::U16 => 2,
            Framing::U32 => 4,
        }
    }
}

/// Largest payload accepted on a `u32`-framed link.
pub const MAX_DIST_PAYLOAD: usize = 1 << 20;

/// Extracts one complete frame payload, or `Err(Wait)` when more bytes are
/// needed. A length prefix exceeding the payload bound is fatal.
pub fn take_frame(buf: &mut Buffer, framing: Framing) -> NetResult<Vec<u8>> {
    let data = buf.read_slice();
    let header = framing.header_size();
    if data.len() < header {
        return Err(NetError::Wait);
    }

    let length = match framing {
        Framing::U16 => usize::from(BigEndian::read_u16(&data[..2])),
        Framing::U32 => {
            let length = BigEndian::read_u32(&data[..4]) as usize;
            if length > MAX_DIST_PAYLOAD {
                return Err(NetError::Fatal(ErrorType::BadFrame));
            }
            length
        }
    };

    if data.len() < header + length {
        return Err(NetError::Wait);
    }

    let frame = data[header..header + length].to_vec();
    buf.consume(header + length);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;
    use std::io::Read;

    /// Reader handing out its data in fixed-size chunks, to exercise
    /// arbitrary read boundaries.
    struct MockChannel {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
    }

    impl MockChannel {
        fn new(data: Vec<u8>, chunk: usize) -> MockChannel {
            MockChannel {
                data,
                cursor: 0,
                chunk,
            }
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let count = min(min(self.chunk, buf.len()), self.data.len() - self.cursor);
            buf[..count].copy_from_slice(&self.data[self.cursor..self.cursor + count]);
            self.cursor += count;
            Ok(count)
        }
    }

    fn frame_u16(payload: &[u8]) -> Vec<u8> {
        let mut wire = vec![0, payload.len() as u8];
        wire.extend_from_slice(payload);
        wire
    }

    #[test]
    fn test_ingress_accumulates() {
        let mut channel = MockChannel::new((0..100u8).collect(), 7);
        let mut buf = Buffer::new(1024);

        let mut total = 0;
        loop {
            let count = buf.ingress(&mut channel).unwrap();
            if count == 0 {
                break;
            }
            total += count;
        }

        assert_eq!(total, 100);
        assert_eq!(buf.read_slice(), (0..100u8).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn test_consume_and_compact() {
        let mut buf = Buffer::new(1024);
        buf.ingress(&mut MockChannel::new(frame_u16(b"hello"), 64)).unwrap();

        buf.consume(2);
        assert_eq!(buf.read_slice(), b"hello");
        buf.consume(5);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overrun_guard() {
        let mut buf = Buffer::new(8);
        let mut channel = MockChannel::new(vec![1; 64], 64);

        buf.ingress(&mut channel).unwrap();
        let err = buf.ingress(&mut channel).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
    }

    #[test]
    fn test_take_frame_fragmented() {
        let wire = frame_u16(b"split me");
        let mut channel = MockChannel::new(wire, 3);
        let mut buf = Buffer::new(1024);

        loop {
            match take_frame(&mut buf, Framing::U16) {
                Ok(frame) => {
                    assert_eq!(frame, b"split me");
                    break;
                }
                Err(NetError::Wait) => {
                    assert!(buf.ingress(&mut channel).unwrap() > 0);
                }
                Err(err) => panic!("unexpected error {:?}", err),
            }
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_take_frame_coalesced() {
        let mut wire = frame_u16(b"one");
        wire.extend_from_slice(&frame_u16(b"two"));
        let mut channel = MockChannel::new(wire, 64);
        let mut buf = Buffer::new(1024);
        buf.ingress(&mut channel).unwrap();

        assert_eq!(take_frame(&mut buf, Framing::U16).unwrap(), b"one");
        assert_eq!(take_frame(&mut buf, Framing::U16).unwrap(), b"two");
        assert_eq!(take_frame(&mut buf, Framing::U16), Err(NetError::Wait));
    }

    #[test]
    fn test_take_frame_u32_keepalive() {
        let mut buf = Buffer::new(1024);
        buf.ingress(&mut MockChannel::new(vec![0, 0, 0, 0], 4)).unwrap();
        assert_eq!(take_frame(&mut buf, Framing::U32).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_take_frame_u32_oversize_is_fatal() {
        let mut buf = Buffer::new(1024);
        buf.ingress(&mut MockChannel::new(vec![0xff, 0, 0, 0], 4)).unwrap();
        assert_eq!(
            take_frame(&mut buf, Framing::U32),
            Err(NetError::Fatal(ErrorType::BadFrame))
        );
    }
}
