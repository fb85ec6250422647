pub mod layout;
pub mod migrate;
pub mod model;
pub mod store;

pub use layout::{ModsLayout, MANIFEST_FILE_NAME, TEMP_PREFIX};
pub use model::{
    derive_mod_id, humanize_name, LoaderType, Manifest, ModEntry, ModHashes, ModSource,
    Placement, Side, SourceKind, CURRENT_SCHEMA_VERSION,
};
pub use store::ManifestStore;
