pub mod codec;
pub mod crypto;
pub mod header;
pub mod index;
pub mod recovery;
pub mod reencode;
pub mod extract;
pub mod archive;
pub mod report;
pub mod logging;

pub use archive::{OpenOptions, Package, PackageError, RunOptions, SourceKind};
pub use codec::{XorMask, BASE_OFFSET};
pub use header::PackageHeader;
pub use index::{parse_index, FileEntry, ParsedIndex};
pub use recovery::{recover, Recovery, RecoveryOptions};
pub use reencode::{reencode, Reconstruction, Verification};
pub use report::RunReport;
