//! Invocation handlers.
//!
//! Each handler takes a host-neutral [`InboundRequest`](crate::invocation::InboundRequest)
//! and always produces an [`OutboundResponse`](crate::invocation::OutboundResponse);
//! failures are rendered as the JSON error envelope.

pub mod chat;
pub mod issue_token;
