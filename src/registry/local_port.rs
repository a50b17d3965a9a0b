use std::fmt::{Debug, Display, Formatter};


/// The application-side port a socket is attached to. This is the key of every connection
///  record, and responses to the application are tagged with it.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LocalPort(u16);

impl LocalPort {
    pub fn from_raw(raw: u16) -> LocalPort {
        LocalPort(raw)
    }

    pub fn to_raw(&self) -> u16 {
        self.0
    }
}

impl Display for LocalPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Debug for LocalPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}
