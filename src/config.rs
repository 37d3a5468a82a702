use std::time::Duration;

/// Default path MTU used to size outbound packets. Not discovered; configured.
pub const INITIAL_MTU: u32 = 1400;
pub const INITIAL_RECV_BUF_SIZE: u32 = 1024 * 1024;
pub const COMMON_HEADER_SIZE: u32 = 12;
pub const DATA_CHUNK_HEADER_SIZE: u32 = 16;
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 65536;
pub const DEFAULT_COOKIE_LIFETIME: Duration = Duration::from_secs(60);
pub const DEFAULT_RTO_INITIAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_RTO_MIN: Duration = Duration::from_millis(1000);
pub const DEFAULT_RTO_MAX: Duration = Duration::from_millis(60000);
pub const DEFAULT_MAX_INIT_RETRANSMITS: usize = 8;

/// Tunables for a single association, supplied at construction time.
///
/// Defaults follow this crate's wire-protocol defaults rather than the
/// wider range RFC 4960 permits implementations to pick; see `DESIGN.md`
/// for why `mtu` and `rto_initial` differ from values seen elsewhere in
/// the SCTP ecosystem.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub(crate) mtu: u32,
    pub(crate) max_receive_buffer_size: u32,
    pub(crate) max_message_size: u32,
    pub(crate) max_num_outbound_streams: u16,
    pub(crate) max_num_inbound_streams: u16,
    pub(crate) cookie_lifetime: Duration,
    pub(crate) rto_initial: Duration,
    pub(crate) rto_min: Duration,
    pub(crate) rto_max: Duration,
    pub(crate) max_init_retransmits: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            mtu: INITIAL_MTU,
            max_receive_buffer_size: INITIAL_RECV_BUF_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_num_outbound_streams: u16::MAX,
            max_num_inbound_streams: u16::MAX,
            cookie_lifetime: DEFAULT_COOKIE_LIFETIME,
            rto_initial: DEFAULT_RTO_INITIAL,
            rto_min: DEFAULT_RTO_MIN,
            rto_max: DEFAULT_RTO_MAX,
            max_init_retransmits: DEFAULT_MAX_INIT_RETRANSMITS,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        TransportConfig::default()
    }

    pub fn with_mtu(&mut self, mtu: u32) -> &mut Self {
        self.mtu = mtu;
        self
    }

    pub fn with_max_receive_buffer_size(&mut self, size: u32) -> &mut Self {
        self.max_receive_buffer_size = size;
        self
    }

    pub fn with_max_message_size(&mut self, size: u32) -> &mut Self {
        self.max_message_size = size;
        self
    }

    pub fn with_max_num_outbound_streams(&mut self, n: u16) -> &mut Self {
        self.max_num_outbound_streams = n;
        self
    }

    pub fn with_max_num_inbound_streams(&mut self, n: u16) -> &mut Self {
        self.max_num_inbound_streams = n;
        self
    }

    pub fn with_cookie_lifetime(&mut self, lifetime: Duration) -> &mut Self {
        self.cookie_lifetime = lifetime;
        self
    }

    pub fn with_rto_initial(&mut self, rto: Duration) -> &mut Self {
        self.rto_initial = rto;
        self
    }
}
