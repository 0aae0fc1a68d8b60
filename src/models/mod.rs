//! Data models for bibliographic records and source queries.

mod candidate;
mod record;
mod search;

pub use candidate::CandidateRecord;
pub use record::{
    AuxData, Author, BibFields, Bibliographic, CanonicalRecord, EnrichmentState, IdType, Link, LinkType,
    SourceType,
};
pub use search::SearchQuery;
