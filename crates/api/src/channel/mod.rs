//! Realtime duplex channel
//!
//! Each chat session can be opened as a WebSocket channel. The client sends one
//! frame per user turn and receives the assistant's reply either as a single
//! `message` frame or as ordered `chunk` frames closed by `done`.
//!
//! # Architecture
//!
//! - **Connection**: one open channel and its lifecycle phase
//! - **Turn**: a single request/response cycle, cancellable by disconnect
//! - **State**: live connection bookkeeping for health reporting
//! - **Handler**: Axum upgrade handler and per-connection tasks
//! - **Events**: frame definitions for both directions

pub mod connection;
pub mod events;
pub mod handler;
pub mod state;
pub mod turn;

pub use handler::ws_handler;
pub use state::{ChannelState, ChannelStats};
