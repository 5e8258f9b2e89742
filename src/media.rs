//! Hand-off of received payload to whatever decodes it.

use std::sync::mpsc;

/// One accepted RTP payload, in receipt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub timestamp: u32,
    /// RTP marker bit; for video, the last packet of a frame.
    pub marker: bool,
    pub payload: Vec<u8>,
}

/// Consumer of accepted RTP payload.
///
/// Called from the data loop for every packet that passes validation.
/// The loop holds no buffer beyond the packet in hand, so a slow sink
/// slows the loop; applying backpressure or dropping is up to the sink.
pub trait MediaSink: Send {
    fn deliver(&mut self, timestamp: u32, marker: bool, payload: &[u8]);
}

impl MediaSink for mpsc::Sender<MediaPacket> {
    fn deliver(&mut self, timestamp: u32, marker: bool, payload: &[u8]) {
        let packet = MediaPacket {
            timestamp,
            marker,
            payload: payload.to_vec(),
        };
        if self.send(packet).is_err() {
            tracing::trace!(timestamp, "media receiver dropped, discarding payload");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_sink_forwards_in_order() {
        let (mut tx, rx) = mpsc::channel();
        tx.deliver(1, false, b"a");
        tx.deliver(2, true, b"b");
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].payload, b"a");
        assert!(got[1].marker);
    }

    #[test]
    fn closed_channel_is_not_an_error() {
        let (mut tx, rx) = mpsc::channel::<MediaPacket>();
        drop(rx);
        tx.deliver(1, false, b"a");
    }
}
