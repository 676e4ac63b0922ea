//! Integration tests against a mock HTTP backend.

mod completion;
mod health;
mod mock_server;
mod streaming;
