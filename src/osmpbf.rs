//! Reader for the OSM PBF container: length-prefixed `BlobHeader`/`Blob`
//! pairs whose payloads are `HeaderBlock` or `PrimitiveBlock` messages.

pub mod blob;
pub mod block;
pub mod proto;

pub use blob::{BlobReader, OSM_DATA, OSM_HEADER};
pub use block::{decode_header_block, PrimitiveBlockView};
