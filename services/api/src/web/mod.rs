pub mod progress;
pub mod protocol;
pub mod rest;
pub mod router;
pub mod state;
pub mod ws_handler;

// Re-export the streaming handlers to make them easily accessible
// to the binary that will build the web server router.
pub use progress::progress_handler;
pub use router::build_router;
pub use ws_handler::ws_handler;
