//! Splits a raw serial byte stream into complete Bowler packet frames.

use bytes::{Buf, Bytes, BytesMut};
use log::warn;

use crate::packet::{HEADER_LEN, RPC_NAME_LEN, SIZE_OFFSET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for enough bytes to read the size byte.
    NeedHeader,
    /// Waiting for the full `11 + size` byte frame.
    NeedBody { want: usize },
}

/// An incremental frame splitter over a rolling buffer.
///
/// Chunks of any size are pushed in as they arrive from the transport;
/// complete frames come out. The parser handles packets fragmented across
/// chunks and several packets coalesced into one chunk, and never drops
/// bytes of a well-formed stream. A header whose size byte cannot hold
/// the four RPC name bytes is impossible; the parser discards a single
/// byte and retries until it finds a plausible header again.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: BytesMut,
    state: State,
    resyncs: u64,
}

impl Default for State {
    fn default() -> Self {
        Self::NeedHeader
    }
}

impl FrameParser {
    /// A parser with an empty rolling buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` to the rolling buffer and drain every complete
    /// frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.state {
                State::NeedHeader => {
                    if self.buf.len() <= SIZE_OFFSET {
                        break;
                    }

                    let size = self.buf[SIZE_OFFSET] as usize;
                    if size < RPC_NAME_LEN {
                        warn!("impossible frame size {size}, discarding one byte to resync");
                        self.buf.advance(1);
                        self.resyncs += 1;
                        continue;
                    }

                    self.state = State::NeedBody {
                        want: HEADER_LEN + size,
                    };
                }
                State::NeedBody { want } => {
                    if self.buf.len() < want {
                        break;
                    }

                    frames.push(self.buf.split_to(want).freeze());
                    self.state = State::NeedHeader;
                }
            }
        }

        frames
    }

    /// Bytes currently buffered awaiting the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// How many bytes have been discarded while resynchronising.
    pub fn resync_count(&self) -> u64 {
        self.resyncs
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use proptest::prelude::*;

    use super::*;

    const PING: [u8; 15] = hex!("03 FFFFFFFFFFFF 10 00 04 11 5F706E67");

    #[test]
    fn test_single_chunk_single_frame() {
        let mut p = FrameParser::new();
        let frames = p.push(&PING);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), PING.as_ref());
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_byte_by_byte_fragmentation() {
        let mut p = FrameParser::new();
        for &b in &PING[..14] {
            assert!(p.push(&[b]).is_empty());
        }
        let frames = p.push(&PING[14..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), PING.as_ref());
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&PING);
        chunk.extend_from_slice(&PING);
        assert_eq!(chunk.len(), 30);

        let mut p = FrameParser::new();
        let frames = p.push(&chunk);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.as_ref() == PING.as_ref()));
        assert_eq!(p.buffered(), 0);
    }

    #[test]
    fn test_leftover_bytes_are_retained() {
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&PING);
        chunk.extend_from_slice(&PING[..5]);

        let mut p = FrameParser::new();
        let frames = p.push(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(p.buffered(), 5);

        let frames = p.push(&PING[5..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), PING.as_ref());
    }

    #[test]
    fn test_resync_discards_one_byte_at_a_time() {
        // Three garbage bytes whose would-be size byte is impossible,
        // followed by a valid ping.
        let mut chunk = vec![0x00, 0x01, 0x02];
        chunk.extend_from_slice(&PING);

        let mut p = FrameParser::new();
        let frames = p.push(&chunk);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_ref(), PING.as_ref());
        assert_eq!(p.resync_count(), 3);
    }

    proptest! {
        #[test]
        fn prop_any_partition_yields_every_frame(
            count in 1usize..5,
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let mut stream = Vec::new();
            for _ in 0..count {
                stream.extend_from_slice(&PING);
            }

            // Split the stream at arbitrary positions and feed the chunks
            // in order.
            let mut positions: Vec<_> =
                cuts.iter().map(|i| i.index(stream.len() + 1)).collect();
            positions.sort_unstable();
            positions.dedup();
            positions.push(stream.len());

            let mut p = FrameParser::new();
            let mut frames = Vec::new();
            let mut at = 0;
            for pos in positions {
                frames.extend(p.push(&stream[at..pos]));
                at = pos;
            }

            prop_assert_eq!(frames.len(), count);
            for f in frames {
                prop_assert_eq!(f.as_ref(), PING.as_ref());
            }
            prop_assert_eq!(p.buffered(), 0);
        }
    }
}
