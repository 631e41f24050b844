// ABOUTME: MySQL collaborators for the sync engine
// ABOUTME: Connection setup, source introspection and reads, destination writes and status table

pub mod connection;
pub mod destination;
pub mod source;
pub mod value;

pub use connection::{connect, connect_with_retry};
pub use destination::MySqlDestination;
pub use source::MySqlSource;
