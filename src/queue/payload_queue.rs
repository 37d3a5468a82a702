use std::collections::HashMap;
use std::time::Instant;

use crate::chunk::DataChunk;
use crate::util::{sna32lt, sna32lte};

/// A DATA chunk the sender is tracking while it is in flight, plus the
/// retransmit/ack bookkeeping the wire chunk itself has no business
/// carrying.
#[derive(Debug, Clone)]
pub(crate) struct SentChunk {
    pub(crate) data: DataChunk,
    pub(crate) acked: bool,
    pub(crate) retransmit: bool,
    pub(crate) miss_indicator: u32,
    pub(crate) since: Instant,
    pub(crate) num_transmits: u32,
}

impl SentChunk {
    pub(crate) fn new(data: DataChunk, since: Instant) -> Self {
        SentChunk {
            data,
            acked: false,
            retransmit: false,
            miss_indicator: 0,
            since,
            num_transmits: 1,
        }
    }
}

/// The inflight (sent-but-not-yet-acked) queue (C4), keyed by TSN so SACK
/// processing and fast-retransmit can address chunks directly.
#[derive(Default, Debug)]
pub(crate) struct PayloadQueue {
    chunk_map: HashMap<u32, SentChunk>,
    sorted: Vec<u32>,
    n_bytes: usize,
}

impl PayloadQueue {
    pub(crate) fn new() -> Self {
        PayloadQueue::default()
    }

    fn update_sorted_keys(&mut self) {
        self.sorted.sort_by(|a, b| {
            if sna32lt(*a, *b) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
    }

    /// Records a chunk as newly sent. If its TSN is already tracked or at
    /// or before `cumulative_tsn`, it is not inserted.
    pub(crate) fn push(&mut self, c: SentChunk, cumulative_tsn: u32) -> bool {
        if self.chunk_map.contains_key(&c.data.tsn) || sna32lte(c.data.tsn, cumulative_tsn) {
            return false;
        }
        self.n_bytes += c.data.user_data.len();
        self.sorted.push(c.data.tsn);
        self.chunk_map.insert(c.data.tsn, c);
        self.update_sorted_keys();
        true
    }

    /// Pops the oldest chunk only if its TSN matches `tsn` — used to drain
    /// the queue in cumulative-ack order.
    pub(crate) fn pop(&mut self, tsn: u32) -> Option<SentChunk> {
        if !self.sorted.is_empty() && tsn == self.sorted[0] {
            self.sorted.remove(0);
            if let Some(c) = self.chunk_map.remove(&tsn) {
                self.n_bytes -= c.data.user_data.len();
                return Some(c);
            }
        }
        None
    }

    /// Marks `tsn` acked, returning the number of payload bytes it freed
    /// (used to shrink the congestion/flight-size counters).
    pub(crate) fn mark_as_acked(&mut self, tsn: u32) -> usize {
        if let Some(c) = self.chunk_map.get_mut(&tsn) {
            c.acked = true;
            c.retransmit = false;
            let n = c.data.user_data.len();
            self.n_bytes -= n;
            c.data.user_data = bytes::Bytes::new();
            n
        } else {
            0
        }
    }

    /// Flags every still-inflight, non-acked chunk for retransmission —
    /// called after T3-rtx fires (§4.5).
    pub(crate) fn mark_all_to_retransmit(&mut self) {
        for c in self.chunk_map.values_mut() {
            if c.acked {
                continue;
            }
            c.retransmit = true;
        }
    }

    /// Removes and returns every chunk flagged for retransmission, sorted
    /// by TSN, so the caller can resend them ahead of fresh pending data.
    pub(crate) fn take_retransmits(&mut self) -> Vec<SentChunk> {
        let tsns: Vec<u32> = self
            .sorted
            .iter()
            .copied()
            .filter(|tsn| self.chunk_map.get(tsn).map(|c| c.retransmit).unwrap_or(false))
            .collect();
        let mut out = Vec::with_capacity(tsns.len());
        for tsn in tsns {
            self.sorted.retain(|t| *t != tsn);
            if let Some(c) = self.chunk_map.remove(&tsn) {
                self.n_bytes -= c.data.user_data.len();
                out.push(c);
            }
        }
        out
    }

    /// Bumps the miss count of every unacked, not-yet-flagged chunk whose
    /// TSN falls strictly below `highest_reported_tsn` (RFC 4960 §7.2.4
    /// HTNA: "Has N Times the Ack"). Flags a chunk for fast retransmit once
    /// its miss count reaches 3. Returns whether any chunk newly entered
    /// fast retransmit, which the caller uses to trigger fast recovery.
    pub(crate) fn increment_miss_indicator_below(&mut self, highest_reported_tsn: u32) -> bool {
        let mut entered = false;
        for tsn in &self.sorted {
            let Some(c) = self.chunk_map.get_mut(tsn) else {
                continue;
            };
            if c.acked || c.retransmit || !sna32lt(c.data.tsn, highest_reported_tsn) {
                continue;
            }
            c.miss_indicator += 1;
            if c.miss_indicator >= 3 {
                c.retransmit = true;
                entered = true;
            }
        }
        entered
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes
    }

    pub(crate) fn len(&self) -> usize {
        self.chunk_map.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::PayloadProtocolIdentifier;
    use bytes::Bytes;

    fn chunk(tsn: u32) -> SentChunk {
        SentChunk::new(
            DataChunk {
                unordered: false,
                beginning_fragment: true,
                ending_fragment: true,
                tsn,
                stream_identifier: 0,
                stream_sequence_number: 0,
                ppid: PayloadProtocolIdentifier(0),
                user_data: Bytes::from_static(b"x"),
            },
            Instant::now(),
        )
    }

    #[test]
    fn push_then_pop_in_tsn_order() {
        let mut q = PayloadQueue::new();
        assert!(q.push(chunk(2), 0));
        assert!(q.push(chunk(1), 0));
        assert_eq!(q.pop(1).unwrap().data.tsn, 1);
        assert!(q.pop(1).is_none());
        assert_eq!(q.pop(2).unwrap().data.tsn, 2);
    }

    #[test]
    fn pushing_an_already_acked_tsn_is_rejected() {
        let mut q = PayloadQueue::new();
        assert!(!q.push(chunk(1), 5));
        assert!(q.is_empty());
    }
}
