//! Wire types for the three protocols the broker speaks.
//!
//! The Anthropic shape is the canonical one: inbound requests are parsed
//! into it (or converted to it), and every outbound response is assembled
//! in it before leaving the broker.

pub mod anthropic;
pub mod gemini;
pub mod openai;
