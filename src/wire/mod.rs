pub mod address_path;
pub mod content_header;
pub mod identifier;
pub mod packet;
pub mod packet_header;
pub mod transport_header;
