use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ring::hmac;

use crate::error::{Error, Result};
use crate::util::constant_time_eq;

const HMAC_SHA1_DIGEST_LEN: usize = 20;
const TCB_FIXED_LEN: usize = 4 + 4 + 4 + 4 + 2 + 2 + 8 + 2 + 2;

/// The association state embedded in a state cookie, per §4.4.1. Carrying
/// this in the cookie itself is what lets the INIT-ACK side stay
/// stateless until the initiator proves liveness with COOKIE-ECHO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tcb {
    pub(crate) my_tag: u32,
    pub(crate) peer_tag: u32,
    pub(crate) next_tsn: u32,
    pub(crate) last_rcvd_tsn: u32,
    pub(crate) num_inbound_streams: u16,
    pub(crate) num_outbound_streams: u16,
    pub(crate) created_at_millis: u64,
    pub(crate) source_port: u16,
    pub(crate) destination_port: u16,
}

impl Tcb {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(TCB_FIXED_LEN);
        buf.put_u32(self.my_tag);
        buf.put_u32(self.peer_tag);
        buf.put_u32(self.next_tsn);
        buf.put_u32(self.last_rcvd_tsn);
        buf.put_u16(self.num_inbound_streams);
        buf.put_u16(self.num_outbound_streams);
        buf.put_u64(self.created_at_millis);
        buf.put_u16(self.source_port);
        buf.put_u16(self.destination_port);
        buf.freeze()
    }

    fn decode(mut raw: Bytes) -> Result<Self> {
        if raw.len() < TCB_FIXED_LEN {
            return Err(Error::ErrCookieTooShort);
        }
        Ok(Tcb {
            my_tag: raw.get_u32(),
            peer_tag: raw.get_u32(),
            next_tsn: raw.get_u32(),
            last_rcvd_tsn: raw.get_u32(),
            num_inbound_streams: raw.get_u16(),
            num_outbound_streams: raw.get_u16(),
            created_at_millis: raw.get_u64(),
            source_port: raw.get_u16(),
            destination_port: raw.get_u16(),
        })
    }
}

/// Mints and verifies HMAC-SHA1-authenticated state cookies.
///
/// The reference implementation this crate is grounded on
/// (`original_source`) keeps a single private key that is overwritten on
/// every fresh INIT, which silently invalidates any COOKIE-ECHO built
/// against the previous INIT-ACK. This type retains the previous key for
/// exactly one rotation so such a cookie still verifies (§9 redesign
/// note).
pub(crate) struct CookieAuthority {
    current: hmac::Key,
    previous: Option<hmac::Key>,
    lifetime: Duration,
}

impl CookieAuthority {
    pub(crate) fn new(lifetime: Duration) -> Self {
        CookieAuthority {
            current: new_key(),
            previous: None,
            lifetime,
        }
    }

    /// Rotates the cookie secret, retaining the outgoing one for one more
    /// rotation. Called each time this association mints a fresh INIT-ACK.
    pub(crate) fn rotate(&mut self) {
        let outgoing = std::mem::replace(&mut self.current, new_key());
        self.previous = Some(outgoing);
    }

    pub(crate) fn mint(&self, tcb: Tcb) -> Bytes {
        let msg = tcb.encode();
        let tag = hmac::sign(&self.current, &msg);
        let mut out = BytesMut::with_capacity(msg.len() + HMAC_SHA1_DIGEST_LEN);
        out.extend_from_slice(&msg);
        out.extend_from_slice(tag.as_ref());
        out.freeze()
    }

    /// Verifies a COOKIE-ECHO's cookie bytes against the current secret,
    /// falling back to the previous one within its grace window, and
    /// checks the embedded creation time against `now_millis` — milliseconds
    /// on the association's own injected clock, the same scale [`Tcb`] was
    /// minted with. Not a wall-clock timestamp: the cookie is only ever
    /// decoded by the association instance that minted it.
    pub(crate) fn verify(&self, cookie: &Bytes, now_millis: u64) -> Result<Tcb> {
        if cookie.len() < HMAC_SHA1_DIGEST_LEN {
            return Err(Error::ErrCookieTooShort);
        }
        let split = cookie.len() - HMAC_SHA1_DIGEST_LEN;
        let msg = cookie.slice(0..split);
        let tail = &cookie[split..];

        let current_tag = hmac::sign(&self.current, &msg);
        let matches_current = constant_time_eq(current_tag.as_ref(), tail);
        let matches_previous = self
            .previous
            .as_ref()
            .map(|k| constant_time_eq(hmac::sign(k, &msg).as_ref(), tail))
            .unwrap_or(false);

        if !matches_current && !matches_previous {
            return Err(Error::ErrCookieHmacMismatch);
        }

        let tcb = Tcb::decode(msg)?;
        let age = Duration::from_millis(now_millis.saturating_sub(tcb.created_at_millis));
        if age > self.lifetime {
            return Err(Error::ErrCookieExpired);
        }
        Ok(tcb)
    }
}

fn new_key() -> hmac::Key {
    use ring::rand::{SecureRandom, SystemRandom};
    let mut key_bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut key_bytes)
        .expect("system RNG must be available to mint cookie secrets");
    hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, &key_bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_tcb() -> Tcb {
        Tcb {
            my_tag: 0x1111_1111,
            peer_tag: 0x2222_2222,
            next_tsn: 100,
            last_rcvd_tsn: 200,
            num_inbound_streams: 3,
            num_outbound_streams: 4,
            created_at_millis: 0,
            source_port: 1,
            destination_port: 2,
        }
    }

    #[test]
    fn mint_then_verify_round_trips() {
        let authority = CookieAuthority::new(Duration::from_secs(60));
        let cookie = authority.mint(sample_tcb());
        let tcb = authority.verify(&cookie, 0).unwrap();
        assert_eq!(tcb, sample_tcb());
    }

    #[test]
    fn tampering_the_hmac_tail_fails_verification() {
        let authority = CookieAuthority::new(Duration::from_secs(60));
        let mut cookie = authority.mint(sample_tcb()).to_vec();
        let last = cookie.len() - 1;
        cookie[last] ^= 0x01;
        assert!(authority.verify(&Bytes::from(cookie), 0).is_err());
    }

    #[test]
    fn previous_secret_still_verifies_for_one_rotation() {
        let mut authority = CookieAuthority::new(Duration::from_secs(60));
        let cookie = authority.mint(sample_tcb());
        authority.rotate();
        assert!(authority.verify(&cookie, 0).is_ok());
        authority.rotate();
        assert!(authority.verify(&cookie, 0).is_err());
    }

    #[test]
    fn expired_cookie_is_rejected() {
        let authority = CookieAuthority::new(Duration::from_secs(60));
        let cookie = authority.mint(sample_tcb());
        assert!(authority.verify(&cookie, 120_000).is_err());
    }
}
