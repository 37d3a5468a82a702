use std::collections::VecDeque;

use crate::chunk::DataChunk;

type PendingBaseQueue = VecDeque<DataChunk>;

/// The not-yet-sent queue (C4): fragments [`crate::Association::write`]
/// produced but that haven't been handed to the peer yet, split so an
/// unordered message never has to wait behind a stalled ordered one.
///
/// Once a multi-fragment message starts being popped, the queue "selects"
/// that message's side and won't interleave fragments from the other side
/// until the ending fragment is popped — RFC 4960 gives no ordering
/// guarantee across streams, but a half-sent message must stay contiguous
/// on the wire for the peer's reassembly to work.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    unordered_queue: PendingBaseQueue,
    ordered_queue: PendingBaseQueue,
    n_bytes: usize,
    selected: bool,
    unordered_is_selected: bool,
}

impl PendingQueue {
    pub(crate) fn new() -> Self {
        PendingQueue::default()
    }

    pub(crate) fn push(&mut self, c: DataChunk) {
        self.n_bytes += c.user_data.len();
        if c.unordered {
            self.unordered_queue.push_back(c);
        } else {
            self.ordered_queue.push_back(c);
        }
    }

    pub(crate) fn peek(&self) -> Option<&DataChunk> {
        if self.selected {
            return if self.unordered_is_selected {
                self.unordered_queue.front()
            } else {
                self.ordered_queue.front()
            };
        }
        self.unordered_queue.front().or_else(|| self.ordered_queue.front())
    }

    pub(crate) fn pop(&mut self, beginning_fragment: bool, unordered: bool) -> Option<DataChunk> {
        let popped = if self.selected {
            let popped = if self.unordered_is_selected {
                self.unordered_queue.pop_front()
            } else {
                self.ordered_queue.pop_front()
            };
            if let Some(p) = &popped {
                if p.ending_fragment {
                    self.selected = false;
                }
            }
            popped
        } else {
            if !beginning_fragment {
                return None;
            }
            if unordered {
                let popped = self.unordered_queue.pop_front();
                if let Some(p) = &popped {
                    if !p.ending_fragment {
                        self.selected = true;
                        self.unordered_is_selected = true;
                    }
                }
                popped
            } else {
                let popped = self.ordered_queue.pop_front();
                if let Some(p) = &popped {
                    if !p.ending_fragment {
                        self.selected = true;
                        self.unordered_is_selected = false;
                    }
                }
                popped
            }
        };
        if let Some(p) = &popped {
            self.n_bytes -= p.user_data.len();
        }
        popped
    }

    pub(crate) fn get_num_bytes(&self) -> usize {
        self.n_bytes
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.unordered_queue.is_empty() && self.ordered_queue.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chunk::PayloadProtocolIdentifier;
    use bytes::Bytes;

    fn frag(unordered: bool, beginning: bool, ending: bool) -> DataChunk {
        DataChunk {
            unordered,
            beginning_fragment: beginning,
            ending_fragment: ending,
            tsn: 0,
            stream_identifier: 0,
            stream_sequence_number: 0,
            ppid: PayloadProtocolIdentifier(0),
            user_data: Bytes::from_static(b"x"),
        }
    }

    #[test]
    fn a_half_popped_ordered_message_stays_selected_until_its_end_fragment() {
        let mut q = PendingQueue::new();
        q.push(frag(false, true, false));
        q.push(frag(false, false, true));
        q.push(frag(true, true, true));

        // begin-fragment pop selects the ordered side
        let first = q.pop(true, false).unwrap();
        assert!(!first.ending_fragment);
        // once selected, subsequent pops keep draining that side regardless
        // of the flags passed, until the ending fragment
        let last = q.pop(false, false).unwrap();
        assert!(last.ending_fragment);
        // now the unordered message is free to go
        assert!(q.pop(true, true).is_some());
    }

    #[test]
    fn a_non_beginning_fragment_cannot_start_a_new_selection() {
        let mut q = PendingQueue::new();
        q.push(frag(false, false, true));
        assert!(q.pop(false, false).is_none());
    }
}
