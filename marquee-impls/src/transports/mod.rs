mod claims;
mod http_transport;

pub use claims::*;
pub use http_transport::*;
