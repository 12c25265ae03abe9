//! Reply collection for a broadcast awaiting acknowledgements from an
//! arbitrary set of respondents (spec §4.9). Grounded on
//! `BroadcastReplyContext.h`'s `NodeIdRangeTable` + `ReaderQueue<Message>`
//! pair, collapsed onto a `tokio::sync::mpsc` channel.

use bytes::Bytes;
use federation_core::Result;
use federation_ring::{NodeIdRange, NodeInstance};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// One reply received for a broadcast: the payload and the range of the
/// ring its sender was responsible for.
pub struct BroadcastReply {
    pub reply: Bytes,
    pub responding_range: NodeIdRange,
    pub sender: NodeInstance,
}

/// Tracks which sub-ranges of a broadcast still owe a reply. Mirrors
/// `NodeIdRangeTable`'s role in `BroadcastReplyContext`: every dispatched
/// sub-range starts outstanding and is removed as replies come in.
struct OutstandingRanges {
    ranges: Vec<NodeIdRange>,
}

impl OutstandingRanges {
    fn new(ranges: Vec<NodeIdRange>) -> Self {
        Self { ranges }
    }

    fn mark_replied(&mut self, range: NodeIdRange) {
        self.ranges.retain(|outstanding| !range.contains_range(outstanding));
    }

    fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    fn snapshot(&self) -> Vec<NodeIdRange> {
        self.ranges.clone()
    }
}

/// Collects replies to a single outstanding broadcast. The sender half
/// (`reply_sender`) is handed to whatever delivers inbound reply messages
/// for this broadcast id; `next_reply` drains them in arrival order.
pub struct BroadcastReplyContext {
    receiver: Mutex<mpsc::UnboundedReceiver<BroadcastReply>>,
    sender: mpsc::UnboundedSender<BroadcastReply>,
    outstanding: Mutex<OutstandingRanges>,
}

impl BroadcastReplyContext {
    pub fn new(dispatched_ranges: Vec<NodeIdRange>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            receiver: Mutex::new(receiver),
            sender,
            outstanding: Mutex::new(OutstandingRanges::new(dispatched_ranges)),
        }
    }

    pub fn reply_sender(&self) -> mpsc::UnboundedSender<BroadcastReply> {
        self.sender.clone()
    }

    /// Submits a reply directly, for callers that already hold one rather
    /// than routing it through the sender handle.
    pub fn on_reply(&self, reply: BroadcastReply) {
        let range = reply.responding_range;
        self.outstanding.lock().mark_replied(range);
        let _ = self.sender.send(reply);
    }

    pub fn outstanding_ranges(&self) -> Vec<NodeIdRange> {
        self.outstanding.lock().snapshot()
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding.lock().is_empty()
    }

    /// Waits up to `per_reply_timeout` for the next reply. Returns `None`
    /// once every dispatched range has replied and the channel has
    /// drained, or on a timeout with nothing outstanding left to wait for.
    pub async fn next_reply(&self, per_reply_timeout: Duration) -> Result<Option<BroadcastReply>> {
        if self.is_complete() {
            return Ok(None);
        }
        let mut receiver = self.receiver.lock();
        match timeout(per_reply_timeout, receiver.recv()).await {
            Ok(Some(reply)) => Ok(Some(reply)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use federation_ring::NodeId;

    fn instance(id: u64) -> NodeInstance {
        NodeInstance::new(NodeId::new(id), 1)
    }

    #[test]
    fn replying_to_every_dispatched_range_completes_the_context() {
        let ranges = vec![
            NodeIdRange::new(NodeId::new(0), NodeId::new(50)),
            NodeIdRange::new(NodeId::new(51), NodeId::new(100)),
        ];
        let ctx = BroadcastReplyContext::new(ranges.clone());
        assert!(!ctx.is_complete());
        ctx.on_reply(BroadcastReply {
            reply: Bytes::from_static(b"a"),
            responding_range: ranges[0],
            sender: instance(1),
        });
        assert!(!ctx.is_complete());
        ctx.on_reply(BroadcastReply {
            reply: Bytes::from_static(b"b"),
            responding_range: ranges[1],
            sender: instance(2),
        });
        assert!(ctx.is_complete());
    }

    #[tokio::test]
    async fn next_reply_yields_queued_replies_in_order() {
        let ranges = vec![NodeIdRange::new(NodeId::new(0), NodeId::new(100))];
        let ctx = BroadcastReplyContext::new(ranges.clone());
        ctx.on_reply(BroadcastReply {
            reply: Bytes::from_static(b"first"),
            responding_range: ranges[0],
            sender: instance(7),
        });
        let received = ctx.next_reply(Duration::from_millis(100)).await.unwrap().unwrap();
        assert_eq!(received.reply, Bytes::from_static(b"first"));
        assert!(ctx.is_complete());
    }

    #[tokio::test]
    async fn waiting_after_completion_returns_none_without_blocking() {
        let ctx = BroadcastReplyContext::new(Vec::new());
        assert!(ctx.is_complete());
        let result = ctx.next_reply(Duration::from_millis(10)).await.unwrap();
        assert!(result.is_none());
    }
}
