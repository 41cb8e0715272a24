/// Per-session row-change fan-out shared by every backend.
pub mod change_feed;
/// Persistent entity definitions.
pub mod models;
/// Session store abstraction and its backends.
pub mod session_store;
/// Storage error types.
pub mod storage;
