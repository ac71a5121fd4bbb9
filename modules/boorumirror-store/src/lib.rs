pub mod error;
pub mod postgres;

pub use error::{Result, StoreError};
pub use postgres::PgMirrorStore;
