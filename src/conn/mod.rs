mod cursor;
mod pool;
mod session;
mod stream;
mod transport;

pub use cursor::{QueryStream, ResultRow};
pub use pool::{Pool, PoolManager, PooledSession};
pub use session::{CancelHandle, Session, SessionState};
pub use stream::{Stream, TimeBudget};
