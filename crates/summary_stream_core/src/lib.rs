pub mod aggregator;
pub mod chunking;
pub mod domain;
pub mod error;
pub mod events;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod ports;
pub mod store;

pub use aggregator::{Aggregator, AggregatorOptions};
pub use domain::{Document, Persona, ProcessingStatus, Section, SectionResult, StreamingEvent, SummaryMetrics};
pub use error::{SummaryError, SummaryResult};
pub use events::{EventPublisher, EventSubscription, ProgressStream};
pub use memory::InMemoryPersistence;
pub use pipeline::{PipelineHandle, PipelineOptions, SectionOutcome, SummaryPipeline};
pub use ports::{PersistenceService, PortError, PortResult, SummarizationService};
pub use store::{SectionStore, UpsertOutcome};
