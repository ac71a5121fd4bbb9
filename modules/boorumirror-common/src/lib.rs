pub mod config;
pub mod types;

pub use config::Config;
pub use types::{
    Extension, PostId, PostRecord, Rating, TagCategory, TagId, TagRecord, TrustLevel, UserId,
    UserRecord,
};
