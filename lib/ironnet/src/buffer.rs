use bytes::BytesMut;
use std::io;

// One recv() reads at most this much.
const RECV_CHUNK: usize = 4096;
// A connection that accumulates this much without a line break is flooding.
const READ_BUF_LIMIT: usize = 65536;

/// Receive-side byte FIFO that frames the stream into lines. Data is
/// appended by [`Buffer::ingress`] and consumed one line at a time.
pub struct Buffer {
    data: BytesMut,
}

impl Buffer {
    #[inline]
    pub fn new() -> Buffer {
        Buffer {
            data: BytesMut::with_capacity(RECV_CHUNK),
        }
    }

    /// The number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true in case the buffer is empty, false otherwise.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reads one chunk from the supplied reader into the buffer. A
    /// zero-length read is the peer closing and surfaces as
    /// `UnexpectedEof`; an overfull buffer with no line break surfaces as
    /// `InvalidData`.
    pub fn ingress<R: io::Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        if self.data.len() >= READ_BUF_LIMIT {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "buffer overrun"));
        }

        let mut chunk = [0u8; RECV_CHUNK];
        let count = reader.read(&mut chunk)?;
        if count == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        self.data.extend_from_slice(&chunk[..count]);
        Ok(count)
    }

    /// Extracts the next complete line, terminator stripped. Accepts both
    /// `\r\n` and bare `\n`.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.data.iter().position(|&b| b == b'\n')?;
        let line = self.data.split_to(newline + 1);

        let mut end = line.len() - 1;
        if end > 0 && line[end - 1] == b'\r' {
            end -= 1;
        }

        Some(String::from_utf8_lossy(&line[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::min;

    /// Reader that hands out data in fixed-size chunks and then blocks.
    struct MockChannel {
        data: Vec<u8>,
        cursor: usize,
        chunk: usize,
    }

    impl MockChannel {
        fn new(data: &[u8], chunk: usize) -> MockChannel {
            MockChannel {
                data: data.to_vec(),
                cursor: 0,
                chunk,
            }
        }
    }

    impl io::Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.cursor == self.data.len() {
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let offset = min(min(self.chunk, buf.len()), self.data.len() - self.cursor);
            buf[..offset].copy_from_slice(&self.data[self.cursor..(self.cursor + offset)]);
            self.cursor += offset;
            Ok(offset)
        }
    }

    fn drain(buffer: &mut Buffer, channel: &mut MockChannel) {
        loop {
            match buffer.ingress(channel) {
                Ok(_) => (),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => panic!("unexpected error {:?}", err),
            }
        }
    }

    #[test]
    fn test_ingress_and_line_extraction() {
        let mut channel = MockChannel::new(b"PING :x\r\nJOIN #a\r\n", 5);
        let mut buffer = Buffer::new();

        drain(&mut buffer, &mut channel);

        assert_eq!(buffer.next_line().unwrap(), "PING :x");
        assert_eq!(buffer.next_line().unwrap(), "JOIN #a");
        assert!(buffer.next_line().is_none());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_bare_newline_accepted() {
        let mut channel = MockChannel::new(b"NICK alice\n", 64);
        let mut buffer = Buffer::new();

        drain(&mut buffer, &mut channel);

        assert_eq!(buffer.next_line().unwrap(), "NICK alice");
    }

    #[test]
    fn test_empty_lines() {
        let mut channel = MockChannel::new(b"\r\n\n", 64);
        let mut buffer = Buffer::new();

        drain(&mut buffer, &mut channel);

        assert_eq!(buffer.next_line().unwrap(), "");
        assert_eq!(buffer.next_line().unwrap(), "");
        assert!(buffer.next_line().is_none());
    }

    #[test]
    fn test_partial_line_stays_buffered() {
        let mut channel = MockChannel::new(b"PRIVMSG #c :hi", 64);
        let mut buffer = Buffer::new();

        drain(&mut buffer, &mut channel);

        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.len(), 14);
    }

    #[test]
    fn test_zero_read_is_eof() {
        let mut eof = io::Cursor::new(Vec::<u8>::new());
        let mut buffer = Buffer::new();

        let result = buffer.ingress(&mut eof);

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_overrun_without_newline() {
        let flood = vec![b'a'; READ_BUF_LIMIT + RECV_CHUNK];
        let mut channel = MockChannel::new(&flood, RECV_CHUNK);
        let mut buffer = Buffer::new();

        let error = loop {
            if let Err(err) = buffer.ingress(&mut channel) {
                break err;
            }
        };

        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
