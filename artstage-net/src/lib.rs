// artstage-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{build_http_client, download_archive, reuse_existing, ArchiveRequest, FetchedArchive};
pub use validation::{sha256_file, validate_url, verify_checksum, verify_zip_signature};
