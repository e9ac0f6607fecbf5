pub mod filesystem;

pub use filesystem::{default_media_root, BlobStore};
