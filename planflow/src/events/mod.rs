//! Event sinks for workflow observability.
//!
//! The engine reports every stage start, transition, suspension and
//! terminal outcome as a [`TransitionEvent`](crate::core::TransitionEvent).
//! Sinks are passed explicitly to the engine and session manager.

mod channel;
mod sink;

pub use channel::ChannelEventSink;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
