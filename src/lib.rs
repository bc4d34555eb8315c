//! Turnstile - Fixed-window admission control for HTTP services
//!
//! This crate decides, per request, whether a client may proceed against a
//! protected route group ("segment"). Each `(segment, client)` pair gets a
//! counter that admits up to `max_hits` requests per window and resets once
//! the window has elapsed. Counters live in an injected concurrent store that
//! a background sweeper keeps bounded; the `http` module wires everything into
//! axum as middleware that answers `429 Too Many Requests` on rejection.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
