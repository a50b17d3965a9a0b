use std::time::Duration;
use anyhow::bail;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::{Identifier, IdentifierKind};


pub struct TransportConfig {
    /// This node's network position: an optional IPv4 fallback identifier, followed by the
    ///  domain and host identifiers. Bound service and content identifiers are appended to this
    ///  path to form the source path of outgoing packets.
    pub local_address: AddressPath,

    /// Delay before an unacknowledged handshake request, data packet or chunk request is
    ///  retransmitted.
    pub ack_delay: Duration,

    /// A closed socket lingers for this long before its record is removed, so that in-flight
    ///  retransmissions and acknowledgments are absorbed rather than treated as unknown traffic.
    pub teardown_delay: Duration,

    /// This is the maximum number of *packets* (not bytes) stored on the sender side pending an
    ///  acknowledgment
    pub window_size: u32,

    pub max_connect_tries: u32,
    pub max_retransmit_tries: u32,
    pub max_chunk_tries: u32,

    pub default_hop_limit: u8,

    /// Upper bound for the accept queue of a listening socket. SYNs arriving when the queue is
    ///  full are dropped without a SYNACK, leaving recovery to the peer's retry budget.
    pub max_pending_connections: usize,
    /// Upper bound for the number of chunks a single socket tracks at a time
    pub max_pending_chunks: usize,
    /// Messages sent while the window is full are queued up to this bound, and dropped beyond it
    pub max_send_backlog: usize,

    pub is_dual_stack_router: bool,
    pub rendezvous_address: Option<AddressPath>,
}

impl TransportConfig {
    pub fn new(local_address: AddressPath) -> TransportConfig {
        TransportConfig {
            local_address,
            ack_delay: Duration::from_millis(300),
            teardown_delay: Duration::from_secs(240),
            window_size: 100,
            max_connect_tries: 30,
            max_retransmit_tries: 30,
            max_chunk_tries: 30,
            default_hop_limit: 250,
            max_pending_connections: 128,
            max_pending_chunks: 1024,
            max_send_backlog: 1024,
            is_dual_stack_router: false,
            rendezvous_address: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window_size == 0 {
            bail!("window size must be at least 1");
        }
        if self.window_size > u32::MAX / 4 {
            bail!("window size {} is too big for wrap-around sequence numbers", self.window_size);
        }
        if self.ack_delay.is_zero() {
            bail!("ack delay must not be zero");
        }
        if self.teardown_delay.is_zero() {
            bail!("teardown delay must not be zero");
        }
        if self.default_hop_limit == 0 {
            bail!("default hop limit must not be zero");
        }
        if self.local_address.find(IdentifierKind::Domain).is_none() {
            bail!("local address {} has no domain identifier", self.local_address);
        }
        if self.local_address.find(IdentifierKind::Host).is_none() {
            bail!("local address {} has no host identifier", self.local_address);
        }
        if self.local_address.intent().map(Identifier::kind) != Some(IdentifierKind::Host) {
            bail!("local address {} must end with the host identifier", self.local_address);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use crate::test_util::{test_host_address, test_identifier};

    #[test]
    fn test_defaults_are_valid() {
        let config = TransportConfig::new(test_host_address(1));
        assert!(config.validate().is_ok());
        assert_eq!(config.window_size, 100);
        assert_eq!(config.ack_delay, Duration::from_millis(300));
    }

    #[rstest]
    #[case::no_domain(AddressPath::from_nodes(vec![test_identifier(IdentifierKind::Host, 1)]))]
    #[case::no_host(AddressPath::from_nodes(vec![test_identifier(IdentifierKind::Domain, 1)]))]
    #[case::host_not_last(AddressPath::from_nodes(vec![
        test_identifier(IdentifierKind::Domain, 1),
        test_identifier(IdentifierKind::Host, 1),
        test_identifier(IdentifierKind::Service, 1),
    ]))]
    fn test_invalid_local_address(#[case] local_address: AddressPath) {
        assert!(TransportConfig::new(local_address).validate().is_err());
    }

    #[rstest]
    #[case::zero_window(|c: &mut TransportConfig| c.window_size = 0)]
    #[case::huge_window(|c: &mut TransportConfig| c.window_size = u32::MAX)]
    #[case::zero_ack_delay(|c: &mut TransportConfig| c.ack_delay = Duration::ZERO)]
    #[case::zero_teardown_delay(|c: &mut TransportConfig| c.teardown_delay = Duration::ZERO)]
    #[case::zero_hop_limit(|c: &mut TransportConfig| c.default_hop_limit = 0)]
    fn test_invalid_settings(#[case] modify: fn(&mut TransportConfig)) {
        let mut config = TransportConfig::new(test_host_address(1));
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
