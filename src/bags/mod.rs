pub mod annotate;
pub mod archive;
pub mod commands;
pub mod info;
pub mod models;
pub mod reconcile;
pub mod scanner;
pub mod store;

pub use annotate::TagAction;
pub use info::{BagInfo, BagInspector, Ros2BagInfo};
pub use models::{BagCatalog, BagFormat, BagRecord, QosProfile, ScannedBag};
pub use store::BagStore;
