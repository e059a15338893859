pub mod codec;
pub mod ip;
pub mod sc;

pub use codec::ObjectMap;
pub use ip::BacnetIpServer;
pub use sc::{BacnetScState, serve as serve_sc};
