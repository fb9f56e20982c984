//! Translation between the public API dialects and the canonical model.
//!
//! The core of the proxy: requests are mapped into the canonical
//! representation, and the downstream provider's events are re-serialized
//! into each dialect's response and streaming wire format. All request and
//! response mapping functions are pure (no I/O).

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
