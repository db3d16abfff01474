pub mod admin;
pub mod auth;
pub mod availability;
pub mod chat_ws;
pub mod chats;
pub mod middleware;
pub mod profiles;
pub mod protocol;
pub mod rest;
pub mod sessions;
pub mod state;

// Re-export the WebSocket handler and auth middleware to make them easily
// accessible to the binary that builds the router.
pub use chat_ws::chat_ws_handler;
pub use middleware::require_auth;
