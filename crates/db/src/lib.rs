pub mod connection;
pub mod files;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use files::FsFileStore;
pub use fixtures::{seed_demo, SeedSummary};
pub use repositories::{SqlDocumentStore, SqlPeopleDirectory, SqlPolicyStore};
