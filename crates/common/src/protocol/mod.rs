mod message;
mod request;
mod response;

pub use message::{ClientMessage, ServerMessage};
pub use request::TunnelRequest;
pub use response::TunnelResponse;
