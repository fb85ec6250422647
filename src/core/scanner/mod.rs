// ─── Filesystem Scanner ───
// Enumerates mod archives in the enabled and disabled directories and
// computes SHA-256 digests on demand.

mod hash;
mod scan;

pub use hash::{sha256_file, HASH_CHUNK_SIZE};
pub use scan::{hash_records, scan, scan_orphans, FileRecord, ARCHIVE_EXTENSIONS};
