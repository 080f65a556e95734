pub mod gate;
pub mod protocol;
pub mod request;

pub use gate::*;
pub use protocol::*;
pub use request::*;
