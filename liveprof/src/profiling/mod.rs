//! Target-process side: instrumentation and the background trigger.

pub mod ack_event;
pub mod clock;
pub mod profiler;
pub mod recording;
pub mod trigger;

pub use ack_event::AckEvent;
pub use profiler::{Profiler, Span, SpanProfiler};
pub use recording::{NodeId, RecordingStats, ROOT};
pub use trigger::{BackgroundTrigger, PreviousHandler, TriggerTransport, TriggerWindow};
