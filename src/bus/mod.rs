// src/bus/mod.rs

//! Event bus boundary.
//!
//! Raw bus envelopes come in through an [`EventSource`]; the
//! [`EventDecoder`] turns them into typed [`BusEvent`]s once, at the edge, so
//! the rest of the engine switches over a closed [`EventKind`] instead of
//! matching tag strings.
//!
//! - [`envelope`] defines the raw and decoded event types.
//! - [`decoder`] classifies tags and filters foreign hosts.
//! - [`source`] provides the `EventSource` trait plus a JSON-lines reader
//!   and an in-process channel source.

pub mod decoder;
pub mod envelope;
pub mod source;

pub use decoder::{DecoderOptions, EventDecoder};
pub use envelope::{BusEvent, EventKind, RawEnvelope};
pub use source::{ChannelSource, EventSource, JsonLinesSource};
