pub mod connection_record;
pub mod connection_registry;
pub mod identifier_pair;
pub mod local_port;
pub mod send_window;
