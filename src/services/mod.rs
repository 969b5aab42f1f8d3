mod records;

pub use records::{DependencyListing, JobDetail, JobListing, RecordService, StreamListing};
