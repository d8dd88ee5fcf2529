pub mod client;
pub mod migrate;
pub mod reader;
pub mod value;
pub mod writer;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use neo4rs::query;
pub use reader::{AggregateQuery, AggregateView, Bucket, Entity, EntityLookup, GraphReader, Overview};
pub use writer::GraphWriter;
