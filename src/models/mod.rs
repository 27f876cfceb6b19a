pub mod batch;
pub mod qa;
pub mod record;
pub mod schema;

pub use batch::{BatchState, BatchStatus, FileProgress, ResultRow, SaveSummary};
pub use qa::{GenerationResult, Language, QaKey, Role};
pub use record::{FileRecord, FileStatus, QaPayload, Record, RowSummary};
pub use schema::SlotSchema;
