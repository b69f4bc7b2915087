pub mod connection;
pub mod standard;
pub(crate) mod tls;
pub mod types;

pub use connection::Conn;
pub use standard::{PgManager, ShutdownHandle};
pub use types::Backend;
