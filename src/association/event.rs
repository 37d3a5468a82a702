use crate::error::AssociationError;

/// Application-visible events, drained via [`crate::Association::poll_event`].
///
/// The reference implementation this crate is grounded on delivers these as
/// Qt signal/slot callbacks fired synchronously from inside socket read
/// handlers (`original_source`). A sans-io association has no socket to
/// call back from, so it queues events instead and lets the host pull them
/// out on its own schedule after each public call (§9 redesign note).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationEvent {
    /// At least one packet is waiting in [`crate::Association::read_outgoing`].
    ReadyReadOutgoing,
    /// The four-way handshake completed; the association is ready to send
    /// and receive user messages.
    Established,
    /// A complete user message was reassembled and is ready for
    /// [`crate::Association::read_message`].
    MessageAvailable { stream_id: u16 },
    /// The association hit a fatal condition from §7's error taxonomy and
    /// moved to `Closed`.
    ErrorOccurred { error: AssociationError },
}
