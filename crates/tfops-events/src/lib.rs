//! Durable event intake and the per-event processing pipeline.
//!
//! Events are published to an [`EventQueue`], claimed by [`EventConsumer`]
//! worker loops and run through the [`EventPipeline`]. A delivery is only
//! acknowledged once the pipeline has finished; transport failures release
//! it for redelivery.

pub mod event_consumer;
pub mod event_pipeline;
pub mod event_queue;
pub mod spool_queue;

#[cfg(test)]
pub(crate) mod test_support;

pub use event_consumer::{ConsumerConfig, EventConsumer, DEFAULT_CONSUMER_GROUP};
pub use event_pipeline::{
    EventDisposition, EventPipeline, EventProcessingReport, PipelineError, PipelineStage,
};
pub use event_queue::{
    Delivery, EventQueue, EventQueueError, EventQueueResult, InMemoryEventQueue,
};
pub use spool_queue::SpoolEventQueue;
