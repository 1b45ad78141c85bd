pub mod config;
pub mod error;
pub mod gateway;
pub mod path;
pub mod registry;
pub mod schema;
pub mod tree;
pub mod view;
pub mod watcher;

pub use config::{MergeMode, RegistryConfig, UpdateMode};
pub use error::{Result, SchemaTreeError};
pub use gateway::{DirectoryGateway, MemoryGateway, PersistenceGateway, SqliteGateway, Subscription};
pub use registry::SchemaRegistry;
pub use schema::{Collection, DataType, Properties, Property};
pub use view::{CollectionNode, SchemaView};
