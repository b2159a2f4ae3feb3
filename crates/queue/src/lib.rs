pub mod error;
pub mod job;
pub mod persistent;

pub use error::QueueError;
pub use job::ExportJob;
pub use persistent::{AddOutcome, PersistentQueue};
