use std::cmp::Ordering;

use bytes::{Bytes, BytesMut};

use crate::chunk::{DataChunk, PayloadProtocolIdentifier};
use crate::util::{sna16lt, sna32lt};

fn sort_by_tsn(c: &mut [DataChunk]) {
    c.sort_by(|a, b| if sna32lt(a.tsn, b.tsn) { Ordering::Less } else { Ordering::Greater });
}

/// A run of DATA fragments sharing one stream sequence number, in the
/// process of being reassembled into one user message.
#[derive(Debug, Clone, Default)]
pub(crate) struct FragmentSet {
    ssn: u16,
    ppid: PayloadProtocolIdentifier,
    fragments: Vec<DataChunk>,
}

impl FragmentSet {
    fn new(ssn: u16, ppid: PayloadProtocolIdentifier) -> Self {
        FragmentSet {
            ssn,
            ppid,
            fragments: vec![],
        }
    }

    fn len(&self) -> usize {
        self.fragments.iter().map(|c| c.user_data.len()).sum()
    }

    /// Appends `chunk`, keeping the set TSN-sorted, and reports whether the
    /// set is now complete.
    fn push(&mut self, chunk: DataChunk) -> bool {
        if self.fragments.iter().any(|c| c.tsn == chunk.tsn) {
            return false;
        }
        self.fragments.push(chunk);
        sort_by_tsn(&mut self.fragments);
        self.is_complete()
    }

    /// RFC 4960 §3.3.1: begins with B=1, ends with E=1, TSNs strictly
    /// sequential in between.
    fn is_complete(&self) -> bool {
        let n = self.fragments.len();
        if n == 0 || !self.fragments[0].beginning_fragment || !self.fragments[n - 1].ending_fragment {
            return false;
        }
        for w in self.fragments.windows(2) {
            if w[1].tsn != w[0].tsn.wrapping_add(1) {
                return false;
            }
        }
        true
    }

    /// Concatenates the fragments into one message. Only valid once
    /// [`FragmentSet::is_complete`] holds.
    fn assemble(&self) -> (Bytes, PayloadProtocolIdentifier) {
        let total: usize = self.len();
        let mut buf = BytesMut::with_capacity(total);
        for c in &self.fragments {
            buf.extend_from_slice(&c.user_data);
        }
        (buf.freeze(), self.ppid)
    }
}

/// A fully reassembled user message, ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReassembledMessage {
    pub(crate) ppid: PayloadProtocolIdentifier,
    pub(crate) data: Bytes,
}

/// Per-stream reassembly and reordering (C6): tracks in-progress ordered
/// and unordered fragment sets and hands back complete messages in
/// delivery order. RFC 4960 §6.5 — ordered delivery waits for the next
/// expected SSN; unordered delivery is released as soon as a set
/// completes.
#[derive(Debug, Default)]
pub(crate) struct ReassemblyQueue {
    next_ssn: u16,
    ordered: Vec<FragmentSet>,
    unordered: Vec<ReassembledMessage>,
    unordered_fragments: Vec<DataChunk>,
    n_bytes: usize,
}

impl ReassemblyQueue {
    pub(crate) fn new() -> Self {
        ReassemblyQueue::default()
    }

    /// Feeds one DATA chunk's payload into the reassembly state for its
    /// stream. Returns true if a new complete message became available as
    /// a result (not necessarily this one, for ordered streams).
    pub(crate) fn push(&mut self, chunk: DataChunk) -> bool {
        self.n_bytes += chunk.user_data.len();
        if chunk.unordered {
            self.unordered_fragments.push(chunk);
            sort_by_tsn(&mut self.unordered_fragments);
            if let Some(set) = self.take_complete_unordered_run() {
                let (data, ppid) = set.assemble();
                self.n_bytes = self.n_bytes.saturating_sub(set.len());
                self.unordered.push(ReassembledMessage { ppid, data });
                return true;
            }
            false
        } else {
            if sna16lt(chunk.stream_sequence_number, self.next_ssn) {
                self.n_bytes = self.n_bytes.saturating_sub(chunk.user_data.len());
                return false; // duplicate of an already-delivered SSN
            }
            let ssn = chunk.stream_sequence_number;
            let ppid = chunk.ppid;
            for set in &mut self.ordered {
                if set.ssn == ssn {
                    return set.push(chunk);
                }
            }
            let mut set = FragmentSet::new(ssn, ppid);
            let completed = set.push(chunk);
            self.ordered.push(set);
            self.ordered.sort_by(|a, b| if sna16lt(a.ssn, b.ssn) { Ordering::Less } else { Ordering::Greater });
            completed
        }
    }

    fn take_complete_unordered_run(&mut self) -> Option<FragmentSet> {
        let mut start = None;
        let mut last_tsn = 0u32;
        let mut end = None;
        for (i, c) in self.unordered_fragments.iter().enumerate() {
            if c.beginning_fragment {
                start = Some(i);
                last_tsn = c.tsn;
                if c.ending_fragment {
                    end = Some(i);
                    break;
                }
                continue;
            }
            let Some(_) = start else { continue };
            if c.tsn != last_tsn.wrapping_add(1) {
                start = None;
                continue;
            }
            last_tsn = c.tsn;
            if c.ending_fragment {
                end = Some(i);
                break;
            }
        }
        let (start, end) = (start?, end?);
        let fragments: Vec<DataChunk> = self.unordered_fragments.drain(start..=end).collect();
        let ppid = fragments[0].ppid;
        let mut set = FragmentSet::new(0, ppid);
        set.fragments = fragments;
        Some(set)
    }

    pub(crate) fn is_readable(&self) -> bool {
        if !self.unordered.is_empty() {
            return true;
        }
        self.ordered
            .first()
            .map(|s| s.is_complete() && !sna16lt(self.next_ssn, s.ssn))
            .unwrap_or(false)
    }

    /// Pops the next deliverable message, if any, advancing `next_ssn` for
    /// an ordered delivery.
    pub(crate) fn read(&mut self) -> Option<ReassembledMessage> {
        if !self.unordered.is_empty() {
            return Some(self.unordered.remove(0));
        }
        let set = self.ordered.first()?;
        if !set.is_complete() || sna16lt(self.next_ssn, set.ssn) {
            return None;
        }
        let set = self.ordered.remove(0);
        if set.ssn == self.next_ssn {
            self.next_ssn = self.next_ssn.wrapping_add(1);
        }
        self.n_bytes = self.n_bytes.saturating_sub(set.len());
        let (data, ppid) = set.assemble();
        Some(ReassembledMessage { ppid, data })
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;

    fn frag(unordered: bool, ssn: u16, tsn: u32, b: bool, e: bool, data: &'static [u8]) -> DataChunk {
        DataChunk {
            unordered,
            beginning_fragment: b,
            ending_fragment: e,
            tsn,
            stream_identifier: 0,
            stream_sequence_number: ssn,
            ppid: PayloadProtocolIdentifier(0),
            user_data: Bytes::from_static(data),
        }
    }

    #[test]
    fn reassembles_ordered_fragments_delivered_out_of_tsn_order() {
        let mut q = ReassemblyQueue::new();
        assert!(!q.push(frag(false, 0, 2, false, true, b"world")));
        assert!(q.push(frag(false, 0, 1, true, false, b"hello ")));
        let msg = q.read().unwrap();
        assert_eq!(&msg.data[..], b"hello world");
    }

    #[test]
    fn ordered_delivery_waits_for_expected_ssn() {
        let mut q = ReassemblyQueue::new();
        assert!(q.push(frag(false, 1, 5, true, true, b"second")));
        assert!(!q.is_readable());
        assert!(q.push(frag(false, 0, 4, true, true, b"first")));
        assert!(q.is_readable());
        assert_eq!(&q.read().unwrap().data[..], b"first");
        assert_eq!(&q.read().unwrap().data[..], b"second");
    }

    #[test]
    fn unordered_delivers_as_soon_as_a_run_completes() {
        let mut q = ReassemblyQueue::new();
        assert!(q.push(frag(true, 0, 1, true, false, b"a")));
        assert!(!q.is_readable());
        assert!(q.push(frag(true, 0, 2, false, true, b"b")));
        assert!(q.is_readable());
        assert_eq!(&q.read().unwrap().data[..], b"ab");
    }
}
