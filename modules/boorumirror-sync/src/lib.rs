pub mod error;
pub mod mirror;
pub mod sync;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use error::{ResolveError, SyncError};
pub use mirror::Mirror;
pub use sync::{CatchUpSync, TickOutcome};
pub use traits::{FetchError, MirrorStore, RemoteLibrary};
