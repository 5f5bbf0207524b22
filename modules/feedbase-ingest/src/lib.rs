pub mod classifier;
pub mod collector;
pub mod geocode;
pub mod logging;
pub mod pipeline;
pub mod session;
pub mod settings;
pub mod traits;

pub use classifier::{classify, FeedItem};
pub use collector::{Collector, SessionReport, SessionTally};
pub use geocode::{Annotator, Geocoder, QuotaGuard};
pub use pipeline::{ItemOutcome, Pipeline, PipelineOptions};
pub use session::{transition, Backoff, SessionAction, SessionEvent, SessionState, TerminationReason};
pub use settings::{Cli, Settings};
pub use traits::{FeedSource, FeedStream};
