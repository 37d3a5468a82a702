use std::time::{Duration, Instant};

use crate::config::{DEFAULT_MAX_INIT_RETRANSMITS, DEFAULT_RTO_MAX, DEFAULT_RTO_MIN};

pub(crate) const ACK_INTERVAL: Duration = Duration::from_millis(200);
const NO_MAX_RETRANS: usize = usize::MAX;
const TIMER_COUNT: usize = 5;

/// The distinct retransmission/delay timers an association runs. Unlike a
/// socket-owning implementation, none of these fire on their own — the host
/// learns the next deadline from [`TimerTable::next_timeout`] and is
/// responsible for calling [`crate::association::Association::handle_timeout`]
/// no later than that instant.
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub(crate) enum Timer {
    T1Init = 0,
    T1Cookie = 1,
    T2Shutdown = 2,
    T3Rtx = 3,
    Ack = 4,
}

impl Timer {
    pub(crate) const VALUES: [Self; TIMER_COUNT] = [
        Timer::T1Init,
        Timer::T1Cookie,
        Timer::T2Shutdown,
        Timer::T3Rtx,
        Timer::Ack,
    ];
}

#[derive(Debug, Clone)]
pub(crate) struct TimerTable {
    data: [Option<Instant>; TIMER_COUNT],
    retrans: [usize; TIMER_COUNT],
    max_retrans: [usize; TIMER_COUNT],
}

impl TimerTable {
    pub(crate) fn new() -> Self {
        TimerTable {
            data: [None; TIMER_COUNT],
            retrans: [0; TIMER_COUNT],
            max_retrans: [
                DEFAULT_MAX_INIT_RETRANSMITS, // T1Init
                DEFAULT_MAX_INIT_RETRANSMITS, // T1Cookie
                NO_MAX_RETRANS,                // T2Shutdown
                NO_MAX_RETRANS,                // T3Rtx
                NO_MAX_RETRANS,                // Ack
            ],
        }
    }

    pub(crate) fn set(&mut self, timer: Timer, time: Option<Instant>) {
        self.data[timer as usize] = time;
    }

    pub(crate) fn get(&self, timer: Timer) -> Option<Instant> {
        self.data[timer as usize]
    }

    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        self.data.iter().filter_map(|&x| x).min()
    }

    pub(crate) fn start(&mut self, timer: Timer, now: Instant, interval: Duration) {
        let interval = if timer == Timer::Ack {
            interval
        } else {
            calculate_next_timeout(interval, self.retrans[timer as usize])
        };
        self.data[timer as usize] = Some(now + interval);
    }

    pub(crate) fn stop(&mut self, timer: Timer) {
        self.data[timer as usize] = None;
        self.retrans[timer as usize] = 0;
    }

    /// Checks whether `timer` has fired by `now`. If so, bumps its
    /// retransmit count and reports whether that count now exceeds the
    /// timer's retransmission limit (§4.5 "retransmission limit exceeded").
    pub(crate) fn is_expired(&mut self, timer: Timer, now: Instant) -> (bool, bool, usize) {
        let expired = self.data[timer as usize].map_or(false, |t| t <= now);
        let mut failure = false;
        if expired {
            self.retrans[timer as usize] += 1;
            if self.retrans[timer as usize] > self.max_retrans[timer as usize] {
                failure = true;
            }
        }
        (expired, failure, self.retrans[timer as usize])
    }
}

const RTO_ALPHA: u64 = 1;
const RTO_BETA: u64 = 2;
const RTO_BASE: u64 = 8;

/// RTT/RTO estimator, RFC 4960 §6.3.1.
#[derive(Debug, Clone)]
pub(crate) struct RtoManager {
    srtt: u64,
    rttvar: f64,
    rto: u64,
    no_update: bool,
}

impl RtoManager {
    pub(crate) fn new(rto_initial: Duration) -> Self {
        RtoManager {
            srtt: 0,
            rttvar: 0.0,
            rto: rto_initial.as_millis() as u64,
            no_update: false,
        }
    }

    pub(crate) fn set_new_rtt(&mut self, rtt_millis: u64) -> u64 {
        if self.no_update {
            return self.srtt;
        }
        if self.srtt == 0 {
            self.srtt = rtt_millis;
            self.rttvar = rtt_millis as f64 / 2.0;
        } else {
            self.rttvar = ((RTO_BASE - RTO_BETA) as f64 * self.rttvar
                + RTO_BETA as f64 * (self.srtt as i64 - rtt_millis as i64).abs() as f64)
                / RTO_BASE as f64;
            self.srtt = ((RTO_BASE - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt_millis) / RTO_BASE;
        }
        self.rto = (self.srtt + (4.0 * self.rttvar) as u64)
            .max(DEFAULT_RTO_MIN.as_millis() as u64)
            .min(DEFAULT_RTO_MAX.as_millis() as u64);
        self.srtt
    }

    pub(crate) fn get_rto(&self) -> Duration {
        Duration::from_millis(self.rto)
    }

    pub(crate) fn reset(&mut self, rto_initial: Duration) {
        if self.no_update {
            return;
        }
        self.srtt = 0;
        self.rttvar = 0.0;
        self.rto = rto_initial.as_millis() as u64;
    }
}

fn calculate_next_timeout(rto: Duration, n_rtos: usize) -> Duration {
    // RFC 4960 §6.3.3 E2: double the RTO on each retransmission, capped at
    // RTO.max.
    if n_rtos < 31 {
        std::cmp::min(rto * (1u32 << n_rtos), DEFAULT_RTO_MAX)
    } else {
        DEFAULT_RTO_MAX
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_millis(1000);
        assert_eq!(calculate_next_timeout(base, 0), Duration::from_millis(1000));
        assert_eq!(calculate_next_timeout(base, 1), Duration::from_millis(2000));
        assert_eq!(calculate_next_timeout(base, 6), DEFAULT_RTO_MAX);
    }

    #[test]
    fn rto_manager_floors_at_rto_min() {
        // A consistently low measured RTT still can't push RTO below
        // RTO.min (1000ms per this crate's stricter default).
        let mut mgr = RtoManager::new(Duration::from_millis(1000));
        for _ in 0..50 {
            mgr.set_new_rtt(20);
        }
        assert_eq!(mgr.get_rto(), DEFAULT_RTO_MIN);
    }

    #[test]
    fn rto_manager_tracks_a_high_measured_rtt() {
        let mut mgr = RtoManager::new(Duration::from_millis(1000));
        for _ in 0..20 {
            mgr.set_new_rtt(5000);
        }
        assert!(mgr.get_rto() > DEFAULT_RTO_MIN);
    }
}
