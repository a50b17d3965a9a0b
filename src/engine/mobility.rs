use anyhow::bail;
use tracing::{debug, info};
use crate::api::ErrorCode;
use crate::config::TransportConfig;
use crate::registry::connection_record::ConnectionRecord;
use crate::wire::address_path::AddressPath;
use crate::wire::identifier::{Identifier, IdentifierKind};


/// This node's own network position, and the address information the application can query
///  and update
pub struct LocalNode {
    address: AddressPath,
    rendezvous: Option<AddressPath>,
    is_dual_stack_router: bool,
}

impl LocalNode {
    pub fn new(config: &TransportConfig) -> LocalNode {
        LocalNode {
            address: config.local_address.clone(),
            rendezvous: config.rendezvous_address.clone(),
            is_dual_stack_router: config.is_dual_stack_router,
        }
    }

    pub fn address(&self) -> &AddressPath {
        &self.address
    }

    pub fn domain(&self) -> Option<&Identifier> {
        self.address.find(IdentifierKind::Domain)
    }

    pub fn host(&self) -> Option<&Identifier> {
        self.address.find(IdentifierKind::Host)
    }

    pub fn fallback(&self) -> Option<&Identifier> {
        self.address.fallback()
    }

    pub fn rendezvous(&self) -> Option<&AddressPath> {
        self.rendezvous.as_ref()
    }

    pub fn set_rendezvous(&mut self, path: AddressPath) {
        self.rendezvous = Some(path);
    }

    pub fn is_dual_stack_router(&self) -> bool {
        self.is_dual_stack_router
    }

    /// the path from this node's current position to `intent`
    pub fn full_path(&self, intent: Identifier) -> AddressPath {
        self.address.with_intent(intent)
    }

    /// Returns the source path for the next packet sent from `record`, derived from the current
    ///  local position and the record's bound identifier. If the local position changed since
    ///  the record's source path was stored (or the socket was bound to nothing but a service
    ///  identifier), the stored path is rewritten.
    pub fn source_path(&self, record: &mut ConnectionRecord) -> Option<AddressPath> {
        let current = self.full_path(record.bound_identifier()?);

        if record.src_path.as_ref() != Some(&current) {
            if record.full_src_path {
                debug!("local address changed, rewriting source path of {:?} to {}", record.port, current);
            }
            record.src_path = Some(current.clone());
            record.full_src_path = true;
        }
        Some(current)
    }

    /// replaces domain and fallback, keeping the host identifier
    pub fn change_domain(&mut self, domain: Identifier, fallback: Option<Identifier>) -> Result<(), ErrorCode> {
        if domain.kind() != IdentifierKind::Domain {
            return Err(ErrorCode::InvalidArgument);
        }
        if fallback.is_some_and(|f| f.kind() != IdentifierKind::Ipv4Fallback) {
            return Err(ErrorCode::InvalidArgument);
        }
        let host = *self.host()
            .ok_or(ErrorCode::AddressNotAvailable)?;

        self.address = AddressPath::new(fallback, vec![domain, host]);
        info!("local address changed to {}", self.address);
        Ok(())
    }

    /// Moves this node to the network described by `route`, which is the path to the new
    ///  domain. The local host identifier is appended to it.
    pub fn relocate(&mut self, route: &AddressPath) -> anyhow::Result<()> {
        if route.find(IdentifierKind::Domain).is_none() {
            bail!("route contains no domain identifier");
        }
        let Some(host) = self.host().copied() else {
            bail!("local address has no host identifier");
        };

        let mut nodes = route.nodes().iter()
            .filter(|id| id.kind() != IdentifierKind::Host)
            .copied()
            .collect::<Vec<_>>();
        nodes.push(host);

        self.address = AddressPath::new(route.fallback().copied(), nodes);
        info!("attached to new network, local address is now {}", self.address);
        Ok(())
    }
}

/// Replaces the cached peer path if a packet arrived from a different one. Sequence state is
///  left untouched.
pub fn update_peer_path(record: &mut ConnectionRecord, observed: &AddressPath) {
    if record.dst_path.as_ref() != Some(observed) {
        if record.dst_path.is_some() {
            debug!("peer of {:?} moved to {}", record.port, observed);
        }
        record.dst_path = Some(observed.clone());
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::connection_record::SocketKind;
    use crate::registry::local_port::LocalPort;
    use crate::test_util::{test_config, test_identifier, test_path};

    fn record() -> ConnectionRecord {
        ConnectionRecord::new(LocalPort::from_raw(1), SocketKind::Stream, &test_config(1))
    }

    #[test]
    fn test_source_path_expands_service_only_binding() {
        let local = LocalNode::new(&test_config(1));
        let mut record = record();
        assert_eq!(local.source_path(&mut record), None);

        record.src_path = Some(AddressPath::from_nodes(vec![test_identifier(IdentifierKind::Service, 5)]));
        assert_eq!(local.source_path(&mut record), Some(test_path(1, IdentifierKind::Service, 5)));
        assert!(record.full_src_path);
        assert_eq!(record.src_path, Some(test_path(1, IdentifierKind::Service, 5)));
    }

    #[test]
    fn test_source_path_follows_domain_change() {
        let mut local = LocalNode::new(&test_config(1));
        let mut record = record();
        record.src_path = Some(test_path(1, IdentifierKind::Service, 5));
        record.full_src_path = true;

        let new_domain = test_identifier(IdentifierKind::Domain, 9);
        local.change_domain(new_domain, None).unwrap();

        let expected = AddressPath::from_nodes(vec![new_domain, test_identifier(IdentifierKind::Host, 1), test_identifier(IdentifierKind::Service, 5)]);
        assert_eq!(local.source_path(&mut record), Some(expected.clone()));
        assert_eq!(record.src_path, Some(expected));
    }

    #[test]
    fn test_change_domain_invalid() {
        let mut local = LocalNode::new(&test_config(1));
        assert_eq!(local.change_domain(test_identifier(IdentifierKind::Host, 9), None), Err(ErrorCode::InvalidArgument));
        assert_eq!(local.change_domain(test_identifier(IdentifierKind::Domain, 9), Some(test_identifier(IdentifierKind::Host, 1))), Err(ErrorCode::InvalidArgument));
        assert_eq!(local.address(), &test_config(1).local_address);
    }

    #[test]
    fn test_relocate() {
        let mut local = LocalNode::new(&test_config(1));
        let fallback = test_identifier(IdentifierKind::Ipv4Fallback, 4);
        let route = AddressPath::new(Some(fallback), vec![test_identifier(IdentifierKind::Domain, 3), test_identifier(IdentifierKind::Host, 3)]);

        local.relocate(&route).unwrap();
        assert_eq!(local.fallback(), Some(&fallback));
        assert_eq!(local.address().nodes(), &[test_identifier(IdentifierKind::Domain, 3), test_identifier(IdentifierKind::Host, 1)]);

        assert!(local.relocate(&AddressPath::from_nodes(vec![test_identifier(IdentifierKind::Host, 3)])).is_err());
    }

    #[test]
    fn test_update_peer_path() {
        let mut record = record();
        update_peer_path(&mut record, &test_path(2, IdentifierKind::Service, 2));
        assert_eq!(record.dst_path, Some(test_path(2, IdentifierKind::Service, 2)));

        record.expected_seq = 7;
        update_peer_path(&mut record, &test_path(3, IdentifierKind::Service, 2));
        assert_eq!(record.dst_path, Some(test_path(3, IdentifierKind::Service, 2)));
        assert_eq!(record.expected_seq, 7);
    }
}
