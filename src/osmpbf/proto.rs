//! Message types of the OSM PBF format (`fileformat.proto` and `osmformat.proto`).
//!
//! Only the fields read by this crate are declared; prost skips the others
//! (metadata `Info` blocks, relations' members, changesets).

use prost::{Message, Oneof};

#[derive(Clone, PartialEq, Message)]
pub struct BlobHeader {
    #[prost(string, required, tag = "1")]
    pub r#type: String,

    #[prost(bytes = "vec", optional, tag = "2")]
    pub indexdata: Option<Vec<u8>>,

    #[prost(int32, required, tag = "3")]
    pub datasize: i32,
}

#[derive(Clone, PartialEq, Message)]
pub struct Blob {
    /// Size of the uncompressed data, when compressed.
    #[prost(int32, optional, tag = "2")]
    pub raw_size: Option<i32>,

    #[prost(oneof = "BlobData", tags = "1, 3, 4, 5, 6, 7")]
    pub data: Option<BlobData>,
}

#[derive(Clone, PartialEq, Oneof)]
pub enum BlobData {
    #[prost(bytes, tag = "1")]
    Raw(Vec<u8>),
    #[prost(bytes, tag = "3")]
    ZlibData(Vec<u8>),
    #[prost(bytes, tag = "4")]
    LzmaData(Vec<u8>),
    #[prost(bytes, tag = "5")]
    Bzip2Data(Vec<u8>),
    #[prost(bytes, tag = "6")]
    Lz4Data(Vec<u8>),
    #[prost(bytes, tag = "7")]
    ZstdData(Vec<u8>),
}

#[derive(Clone, PartialEq, Message)]
pub struct HeaderBlock {
    #[prost(message, optional, tag = "1")]
    pub bbox: Option<HeaderBBox>,

    #[prost(string, repeated, tag = "4")]
    pub required_features: Vec<String>,

    #[prost(string, repeated, tag = "5")]
    pub optional_features: Vec<String>,

    #[prost(string, optional, tag = "16")]
    pub writingprogram: Option<String>,

    #[prost(string, optional, tag = "17")]
    pub source: Option<String>,
}

/// Bounding box in nanodegrees.
#[derive(Clone, PartialEq, Message)]
pub struct HeaderBBox {
    #[prost(sint64, required, tag = "1")]
    pub left: i64,
    #[prost(sint64, required, tag = "2")]
    pub right: i64,
    #[prost(sint64, required, tag = "3")]
    pub top: i64,
    #[prost(sint64, required, tag = "4")]
    pub bottom: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrimitiveBlock {
    #[prost(message, required, tag = "1")]
    pub stringtable: StringTable,

    #[prost(message, repeated, tag = "2")]
    pub primitivegroup: Vec<PrimitiveGroup>,

    /// Nanodegrees per coordinate unit, 100 when absent.
    #[prost(int32, optional, tag = "17")]
    pub granularity: Option<i32>,

    #[prost(int64, optional, tag = "19")]
    pub lat_offset: Option<i64>,

    #[prost(int64, optional, tag = "20")]
    pub lon_offset: Option<i64>,
}

#[derive(Clone, PartialEq, Message)]
pub struct StringTable {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub s: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct PrimitiveGroup {
    #[prost(message, repeated, tag = "1")]
    pub nodes: Vec<Node>,

    #[prost(message, optional, tag = "2")]
    pub dense: Option<DenseNodes>,

    #[prost(message, repeated, tag = "3")]
    pub ways: Vec<Way>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Node {
    #[prost(sint64, required, tag = "1")]
    pub id: i64,

    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,

    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,

    #[prost(sint64, required, tag = "8")]
    pub lat: i64,

    #[prost(sint64, required, tag = "9")]
    pub lon: i64,
}

/// Nodes with delta-coded ids and coordinates. Tags of all nodes share one
/// `keys_vals` stream of `key, value` string indices, each node terminated by 0.
#[derive(Clone, PartialEq, Message)]
pub struct DenseNodes {
    #[prost(sint64, repeated, tag = "1")]
    pub id: Vec<i64>,

    #[prost(sint64, repeated, tag = "8")]
    pub lat: Vec<i64>,

    #[prost(sint64, repeated, tag = "9")]
    pub lon: Vec<i64>,

    #[prost(int32, repeated, tag = "10")]
    pub keys_vals: Vec<i32>,
}

#[derive(Clone, PartialEq, Message)]
pub struct Way {
    #[prost(int64, required, tag = "1")]
    pub id: i64,

    #[prost(uint32, repeated, tag = "2")]
    pub keys: Vec<u32>,

    #[prost(uint32, repeated, tag = "3")]
    pub vals: Vec<u32>,

    /// Delta-coded node ids.
    #[prost(sint64, repeated, tag = "8")]
    pub refs: Vec<i64>,
}
