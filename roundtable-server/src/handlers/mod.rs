pub mod ingest;
pub mod resume;
