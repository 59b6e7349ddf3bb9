pub mod config;
pub mod http_client;
pub mod ingest;
pub mod logging;
pub mod merge;
pub mod names;
pub mod positions;
pub mod registry;
pub mod sources;
pub mod store;
pub mod table_locator;
pub mod text;
