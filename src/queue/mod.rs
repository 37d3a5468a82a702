pub(crate) mod payload_queue;
pub(crate) mod pending;
pub(crate) mod reassembly;
