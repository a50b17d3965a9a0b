use tokio::time::Instant;
use tracing::{debug, span, trace, Level};
use crate::engine::{content, handshake, reliability, TransportEngine};
use crate::registry::connection_record::TimerEvent;


/// The engine's single wakeup point in time. Arming requests only ever move it earlier; only
///  a timer sweep moves it later (or clears it).
#[derive(Debug, Default)]
pub struct Alarm {
    at: Option<Instant>,
}

impl Alarm {
    pub fn at(&self) -> Option<Instant> {
        self.at
    }

    pub fn request(&mut self, at: Instant) {
        self.at = Some(match self.at {
            Some(current) => current.min(at),
            None => at,
        });
    }

    fn set(&mut self, at: Option<Instant>) {
        self.at = at;
    }
}

impl TransportEngine {
    /// Sweeps all connection records once, performing due retransmissions, failure escalations
    ///  and teardowns. The alarm is then set to the earliest remaining due time across all
    ///  records, or cleared if there is none.
    pub fn on_timer(&mut self, now: Instant) {
        let span = span!(Level::TRACE, "timer_sweep");
        let _entered = span.enter();

        let mut next_wakeup: Option<Instant> = None;
        let mut released = Vec::new();

        for port in self.registry.ports() {
            let Some(record) = self.registry.get_mut(port) else {
                continue;
            };

            if let Some(timer) = record.timer {
                if timer.expiry <= now {
                    match timer.event {
                        TimerEvent::HandshakeWait => {
                            if let Some(pair) = handshake::on_handshake_timeout(record, &self.local, self.sink.as_ref(), &self.config, now) {
                                released.push((pair, port));
                            }
                        }
                        TimerEvent::DataAckWait => reliability::on_data_ack_timeout(record, &self.local, self.sink.as_ref(), &self.config, now),
                    }
                }
            }

            for pair in content::on_chunk_timeouts(record, &self.local, self.sink.as_ref(), &self.config, now) {
                released.push((pair, port));
            }

            if record.teardown_at.is_some_and(|at| at <= now) {
                debug!("linger time of closed socket {:?} expired, removing it", port);
                self.registry.remove(port);
                continue;
            }

            if let Some(expiry) = record.next_expiry() {
                next_wakeup = Some(match next_wakeup {
                    Some(current) => current.min(expiry),
                    None => expiry,
                });
            }
        }

        for (pair, port) in released {
            self.registry.unregister_pair(&pair, port);
        }

        trace!("next wakeup: {:?}", next_wakeup);
        self.alarm.set(next_wakeup);
    }
}
