use bytes::{Buf, BufMut, Bytes, BytesMut};
use joblens_common::constants::FRAME_DELIMITER;
use std::io;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The frame grew past the configured maximum before its delimiter arrived.
    Oversized,
    /// The stream ended in the middle of a frame.
    Unterminated,
}

/// One unit read off the job channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of a complete frame, delimiter stripped.
    Message(Bytes),
    /// Bytes that were dropped without being decoded.
    Discarded { len: usize, reason: DiscardReason },
}

/// Newline-delimited framing for the job channel.
///
/// Blank lines are skipped. A frame longer than `max_frame_bytes` is dropped
/// as a whole, including the part that arrives after the limit was hit, so the
/// reader always resynchronizes on the next delimiter.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    next_index: usize,
    discarding: Option<usize>,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            next_index: 0,
            discarding: None,
        }
    }

    /// Most bytes an unterminated frame may hold. A trailing `\r` may still
    /// turn out to be part of a `\r\n` delimiter, so it is not counted yet.
    fn pending_limit(&self, buf: &BytesMut) -> usize {
        match buf.last() {
            Some(b'\r') => self.max_frame_bytes.saturating_add(1),
            _ => self.max_frame_bytes,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            let delimiter = buf[self.next_index..]
                .iter()
                .position(|b| *b == FRAME_DELIMITER)
                .map(|offset| self.next_index + offset);

            match (self.discarding, delimiter) {
                (Some(discarded), Some(offset)) => {
                    buf.advance(offset + 1);
                    self.discarding = None;
                    self.next_index = 0;
                    return Ok(Some(Frame::Discarded {
                        len: discarded + offset,
                        reason: DiscardReason::Oversized,
                    }));
                }
                (Some(discarded), None) => {
                    self.discarding = Some(discarded + buf.len());
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (None, Some(offset)) => {
                    let mut line = buf.split_to(offset + 1).freeze();
                    self.next_index = 0;
                    line.truncate(offset);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    if line.len() > self.max_frame_bytes {
                        return Ok(Some(Frame::Discarded {
                            len: line.len(),
                            reason: DiscardReason::Oversized,
                        }));
                    }
                    return Ok(Some(Frame::Message(line)));
                }
                (None, None) if buf.len() > self.pending_limit(buf) => {
                    self.discarding = Some(buf.len());
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (None, None) => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if let Some(discarded) = self.discarding.take() {
            let len = discarded + buf.len();
            buf.clear();
            return Ok(Some(Frame::Discarded {
                len,
                reason: DiscardReason::Oversized,
            }));
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            buf.clear();
            return Ok(None);
        }
        let len = buf.len();
        buf.clear();
        Ok(Some(Frame::Discarded {
            len,
            reason: DiscardReason::Unterminated,
        }))
    }
}

impl Encoder<&[u8]> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: &[u8], dst: &mut BytesMut) -> Result<(), io::Error> {
        if payload.contains(&FRAME_DELIMITER) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload contains the frame delimiter",
            ));
        }
        if payload.len() > self.max_frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload of {} bytes exceeds the {} byte frame limit",
                    payload.len(),
                    self.max_frame_bytes
                ),
            ));
        }
        dst.reserve(payload.len() + 1);
        dst.put_slice(payload);
        dst.put_u8(FRAME_DELIMITER);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn message(text: &str) -> Frame {
        Frame::Message(Bytes::copy_from_slice(text.as_bytes()))
    }

    #[test]
    fn test_splits_back_to_back_frames() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"{\"JobID\":2}\n{\"JobID\":3}\n"[..]);

        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![message("{\"JobID\":2}"), message("{\"JobID\":3}")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_waits_for_delimiter_across_reads() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"{\"JobID\""[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b":2}\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(message("{\"JobID\":2}")));
    }

    #[test]
    fn test_skips_blank_lines() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"\n  \n{}\n\n"[..]);
        assert_eq!(decode_all(&mut codec, &mut buf), vec![message("{}")]);
    }

    #[test]
    fn test_discards_oversized_frame_and_resynchronizes() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());

        buf.extend_from_slice(b"abc\nok\n");
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![
                Frame::Discarded {
                    len: 13,
                    reason: DiscardReason::Oversized
                },
                message("ok"),
            ]
        );
    }

    #[test]
    fn test_oversized_frame_in_single_read() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::from(&b"toolong\nok\n"[..]);
        assert_eq!(
            decode_all(&mut codec, &mut buf),
            vec![
                Frame::Discarded {
                    len: 7,
                    reason: DiscardReason::Oversized
                },
                message("ok"),
            ]
        );
    }

    #[test]
    fn test_frame_at_limit_is_kept_however_it_is_split() {
        let input = b"abcd\r\n";
        for split in 0..=input.len() {
            let mut codec = FrameCodec::new(4);
            let mut buf = BytesMut::from(&input[..split]);
            let mut frames = decode_all(&mut codec, &mut buf);
            buf.extend_from_slice(&input[split..]);
            frames.extend(decode_all(&mut codec, &mut buf));
            assert_eq!(frames, vec![message("abcd")], "split at {split}");
        }
    }

    #[test]
    fn test_frame_over_limit_is_dropped_however_it_is_split() {
        let input = b"abcde\r\nok\n";
        for split in 0..=input.len() {
            let mut codec = FrameCodec::new(4);
            let mut buf = BytesMut::from(&input[..split]);
            let mut frames = decode_all(&mut codec, &mut buf);
            buf.extend_from_slice(&input[split..]);
            frames.extend(decode_all(&mut codec, &mut buf));

            assert_eq!(frames.len(), 2, "split at {split}");
            assert!(matches!(
                frames[0],
                Frame::Discarded {
                    reason: DiscardReason::Oversized,
                    ..
                }
            ));
            assert_eq!(frames[1], message("ok"));
        }
    }

    #[test]
    fn test_unterminated_tail_at_eof() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"{}\n{\"JobID\":"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(message("{}")));
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap(),
            Some(Frame::Discarded {
                len: 9,
                reason: DiscardReason::Unterminated
            })
        );
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let mut codec = FrameCodec::new(64);
        let mut dst = BytesMut::new();
        codec.encode(&b"{\"JobID\":2}"[..], &mut dst).unwrap();
        assert_eq!(&dst[..], b"{\"JobID\":2}\n");
    }

    #[test]
    fn test_encode_rejects_embedded_delimiter_and_oversize() {
        let mut codec = FrameCodec::new(4);
        let mut dst = BytesMut::new();
        assert!(codec.encode(&b"a\nb"[..], &mut dst).is_err());
        assert!(codec.encode(&b"12345"[..], &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
