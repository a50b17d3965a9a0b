use std::hash::{Hash, Hasher};
use crate::wire::identifier::Identifier;


/// A pair of identifiers that is stored with a direction but compared without one: `(a, b)`
///  and `(b, a)` are equal and hash the same. This allows looking up a flow from packets
///  travelling in either direction.
#[derive(Debug, Clone, Copy)]
pub struct IdentifierPair {
    pub src: Identifier,
    pub dst: Identifier,
}

impl IdentifierPair {
    pub fn new(src: Identifier, dst: Identifier) -> IdentifierPair {
        IdentifierPair { src, dst }
    }

    fn ordered(&self) -> (&Identifier, &Identifier) {
        if self.src <= self.dst {
            (&self.src, &self.dst)
        }
        else {
            (&self.dst, &self.src)
        }
    }
}

impl PartialEq for IdentifierPair {
    fn eq(&self, other: &Self) -> bool {
        self.ordered() == other.ordered()
    }
}
impl Eq for IdentifierPair {}

impl Hash for IdentifierPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ordered().hash(state);
    }
}
