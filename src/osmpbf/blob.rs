use std::io::{self, Read};

use flate2::read::ZlibDecoder;
use log::warn;
use prost::Message;
use xz::read::XzDecoder;
use xz::stream::Stream;

use crate::errors::{Error, ErrorKind, Result};

use super::proto::{self, BlobData};

/// Upper bound on a serialized `BlobHeader`.
pub const MAX_HEADER_SIZE: usize = 64 * 1024;
/// Upper bound on a serialized `Blob` and on its decompressed content.
pub const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;

pub const OSM_HEADER: &str = "OSMHeader";
pub const OSM_DATA: &str = "OSMData";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    pub kind: String,
    pub payload_size: usize,
}

/// Content of a `Blob` message before decompression.
#[derive(Debug, PartialEq, Eq)]
pub enum BlobPayload {
    Raw(Vec<u8>),
    Zlib {
        bytes: Vec<u8>,
        decompressed_size: Option<usize>,
    },
    Lzma {
        bytes: Vec<u8>,
        decompressed_size: Option<usize>,
    },
}

fn malformed(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::MalformedContainer, message)
}

fn read_exact_or_malformed<R: Read>(stream: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    stream.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => malformed(format!(
            "Stream ended inside {} ({} bytes expected)",
            what,
            buf.len()
        )),
        _ => err.into(),
    })
}

/// Reads the length prefix and the `BlobHeader` it announces.
///
/// Returns `None` when the stream ends cleanly before a new prefix.
pub fn read_next_header<R: Read>(stream: &mut R) -> Result<Option<BlobHeader>> {
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        match stream.read(&mut prefix[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    if filled == 0 {
        return Ok(None);
    }
    if filled < prefix.len() {
        return Err(malformed(format!(
            "Stream ended inside blob header length prefix ({} of 4 bytes)",
            filled
        )));
    }

    let header_size = u32::from_be_bytes(prefix) as usize;
    if header_size > MAX_HEADER_SIZE {
        return Err(malformed(format!(
            "Blob header of {} bytes exceeds the {} byte limit",
            header_size, MAX_HEADER_SIZE
        )));
    }

    let mut header_bytes = vec![0u8; header_size];
    read_exact_or_malformed(stream, &mut header_bytes, "blob header")?;
    let header = proto::BlobHeader::decode(header_bytes.as_slice())?;

    let payload_size = usize::try_from(header.datasize)
        .map_err(|_| malformed(format!("Negative blob size {}", header.datasize)))?;
    if payload_size > MAX_BLOB_SIZE {
        return Err(malformed(format!(
            "Blob of {} bytes exceeds the {} byte limit",
            payload_size, MAX_BLOB_SIZE
        )));
    }

    Ok(Some(BlobHeader {
        kind: header.r#type,
        payload_size,
    }))
}

/// Reads the blob announced by `header` and resolves it to its decoded bytes.
pub fn read_blob<R: Read>(stream: &mut R, header: &BlobHeader) -> Result<Vec<u8>> {
    let mut blob_bytes = vec![0u8; header.payload_size];
    read_exact_or_malformed(stream, &mut blob_bytes, "blob")?;
    let payload = parse_payload(&blob_bytes)?;
    decompress(payload)
}

pub fn parse_payload(blob_bytes: &[u8]) -> Result<BlobPayload> {
    let blob = proto::Blob::decode(blob_bytes)?;
    let decompressed_size = match blob.raw_size {
        Some(size) => Some(usize::try_from(size).map_err(|_| {
            Error::new(ErrorKind::CorruptPayload, format!("Negative raw size {}", size))
        })?),
        None => None,
    };

    match blob.data {
        Some(BlobData::Raw(bytes)) => Ok(BlobPayload::Raw(bytes)),
        Some(BlobData::ZlibData(bytes)) => Ok(BlobPayload::Zlib { bytes, decompressed_size }),
        Some(BlobData::LzmaData(bytes)) => Ok(BlobPayload::Lzma { bytes, decompressed_size }),
        Some(BlobData::Bzip2Data(_)) => Err(Error::new(ErrorKind::UnsupportedCodec, "bzip2 blobs are not supported")),
        Some(BlobData::Lz4Data(_)) => Err(Error::new(ErrorKind::UnsupportedCodec, "lz4 blobs are not supported")),
        Some(BlobData::ZstdData(_)) => Err(Error::new(ErrorKind::UnsupportedCodec, "zstd blobs are not supported")),
        None => Err(Error::new(ErrorKind::UnsupportedCodec, "Blob carries no data")),
    }
}

pub fn decompress(payload: BlobPayload) -> Result<Vec<u8>> {
    match payload {
        BlobPayload::Raw(bytes) => Ok(bytes),
        BlobPayload::Zlib { bytes, decompressed_size } => {
            read_decompressed(ZlibDecoder::new(bytes.as_slice()), decompressed_size, "zlib")
        },
        BlobPayload::Lzma { bytes, decompressed_size } => {
            let stream = Stream::new_lzma_decoder(u64::MAX)?;
            read_decompressed(XzDecoder::new_stream(bytes.as_slice(), stream), decompressed_size, "lzma")
        },
    }
}

fn read_decompressed<R: Read>(decoder: R, expected: Option<usize>, codec: &str) -> Result<Vec<u8>> {
    if let Some(size) = expected.filter(|size| *size > MAX_BLOB_SIZE) {
        return Err(Error::new(
            ErrorKind::CorruptPayload,
            format!("Declared size {} exceeds the {} byte limit", size, MAX_BLOB_SIZE),
        ));
    }
    let limit = expected.unwrap_or(MAX_BLOB_SIZE);
    let mut out = Vec::with_capacity(expected.unwrap_or(0));

    // One byte past the limit is enough to tell an oversized stream apart.
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|err| Error::new(ErrorKind::CorruptPayload, format!("{} stream: {}", codec, err)))?;

    match expected {
        Some(size) if out.len() != size => Err(Error::new(
            ErrorKind::CorruptPayload,
            format!("{} stream decompressed to {} bytes, {} declared", codec, out.len(), size),
        )),
        None if out.len() > MAX_BLOB_SIZE => Err(Error::new(
            ErrorKind::CorruptPayload,
            format!("{} stream exceeds the {} byte limit", codec, MAX_BLOB_SIZE),
        )),
        _ => Ok(out),
    }
}

/// Pull-based iterator over the blobs of a container stream, in file order.
pub struct BlobReader<R: Read> {
    stream: R,
    failed: bool,
}

impl<R: Read> BlobReader<R> {
    pub fn new(stream: R) -> Self {
        BlobReader {
            stream,
            failed: false,
        }
    }

    fn next_blob(&mut self) -> Result<Option<(BlobHeader, Vec<u8>)>> {
        let header = match read_next_header(&mut self.stream)? {
            Some(header) => header,
            None => return Ok(None),
        };
        if header.kind != OSM_HEADER && header.kind != OSM_DATA {
            warn!(kind = header.kind.as_str(), size = header.payload_size; "Skipping unknown blob kind");
            let skipped = io::copy(&mut (&mut self.stream).take(header.payload_size as u64), &mut io::sink())?;
            if skipped != header.payload_size as u64 {
                return Err(malformed(format!("Stream ended inside {} blob", header.kind)));
            }
            return Ok(Some((header, Vec::new())));
        }
        let data = read_blob(&mut self.stream, &header)?;
        Ok(Some((header, data)))
    }
}

impl<R: Read> Iterator for BlobReader<R> {
    type Item = Result<(BlobHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_blob() {
            Ok(Some(blob)) => Some(Ok(blob)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::{Cursor, Write};

    use flate2::{write::ZlibEncoder, Compression};
    use xz::stream::LzmaOptions;

    use super::*;

    pub fn frame(kind: &str, blob: &proto::Blob) -> Vec<u8> {
        let blob_bytes = blob.encode_to_vec();
        let header = proto::BlobHeader {
            r#type: kind.to_string(),
            indexdata: None,
            datasize: blob_bytes.len() as i32,
        };
        let header_bytes = header.encode_to_vec();
        let mut out = (header_bytes.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&blob_bytes);
        out
    }

    pub fn zlib_blob(data: &[u8]) -> proto::Blob {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        proto::Blob {
            raw_size: Some(data.len() as i32),
            data: Some(BlobData::ZlibData(encoder.finish().unwrap())),
        }
    }

    fn lzma_bytes(data: &[u8]) -> Vec<u8> {
        let options = LzmaOptions::new_preset(6).unwrap();
        let stream = Stream::new_lzma_encoder(&options).unwrap();
        let mut encoder = xz::write::XzEncoder::new_stream(Vec::new(), stream);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn raw_blob_is_returned_unchanged() {
        let data: Vec<u8> = (0..=255).cycle().take(1000).collect();
        let blob = proto::Blob {
            raw_size: None,
            data: Some(BlobData::Raw(data.clone())),
        };
        let bytes = frame(OSM_DATA, &blob);
        let mut cursor = Cursor::new(bytes.clone());

        let header = read_next_header(&mut cursor).unwrap().unwrap();
        assert_eq!(header.kind, OSM_DATA);
        assert_eq!(read_blob(&mut cursor, &header).unwrap(), data);
        assert_eq!(cursor.position() as usize, bytes.len());
        assert!(read_next_header(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn zlib_blob_is_inflated() {
        let data = b"rail rail rail rail rail rail".repeat(40);
        let mut cursor = Cursor::new(frame(OSM_DATA, &zlib_blob(&data)));
        let header = read_next_header(&mut cursor).unwrap().unwrap();
        assert_eq!(read_blob(&mut cursor, &header).unwrap(), data);
    }

    #[test]
    fn lzma_blob_is_decoded() {
        let data = b"narrow gauge, standard gauge, broad gauge".repeat(25);
        let payload = BlobPayload::Lzma {
            bytes: lzma_bytes(&data),
            decompressed_size: Some(data.len()),
        };
        assert_eq!(decompress(payload).unwrap(), data);
    }

    #[test]
    fn size_mismatch_is_corrupt_payload() {
        let data = b"0123456789".repeat(10);
        let mut blob = zlib_blob(&data);
        blob.raw_size = Some(data.len() as i32 + 5);
        let payload = parse_payload(&blob.encode_to_vec()).unwrap();
        let err = decompress(payload).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CorruptPayload);

        blob.raw_size = Some(data.len() as i32 - 5);
        let payload = parse_payload(&blob.encode_to_vec()).unwrap();
        assert_eq!(decompress(payload).unwrap_err().kind, ErrorKind::CorruptPayload);
    }

    #[test]
    fn unsupported_codecs_are_rejected() {
        let blob = proto::Blob {
            raw_size: Some(3),
            data: Some(BlobData::ZstdData(vec![1, 2, 3])),
        };
        assert_eq!(parse_payload(&blob.encode_to_vec()).unwrap_err().kind, ErrorKind::UnsupportedCodec);

        let empty = proto::Blob { raw_size: None, data: None };
        assert_eq!(parse_payload(&empty.encode_to_vec()).unwrap_err().kind, ErrorKind::UnsupportedCodec);
    }

    #[test]
    fn truncated_streams_are_malformed() {
        let blob = proto::Blob {
            raw_size: None,
            data: Some(BlobData::Raw(vec![7; 64])),
        };
        let bytes = frame(OSM_DATA, &blob);

        let mut prefix_only = Cursor::new(bytes[..2].to_vec());
        assert_eq!(read_next_header(&mut prefix_only).unwrap_err().kind, ErrorKind::MalformedContainer);

        let mut header_cut = Cursor::new(bytes[..6].to_vec());
        assert_eq!(read_next_header(&mut header_cut).unwrap_err().kind, ErrorKind::MalformedContainer);

        let mut blob_cut = Cursor::new(bytes[..bytes.len() - 10].to_vec());
        let header = read_next_header(&mut blob_cut).unwrap().unwrap();
        assert_eq!(read_blob(&mut blob_cut, &header).unwrap_err().kind, ErrorKind::MalformedContainer);
    }

    #[test]
    fn oversized_header_is_malformed() {
        let mut bytes = ((MAX_HEADER_SIZE + 1) as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0; 16]);
        let err = read_next_header(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedContainer);
    }

    #[test]
    fn reader_iterates_in_file_order_and_skips_unknown_kinds() {
        let first = proto::Blob { raw_size: None, data: Some(BlobData::Raw(b"first".to_vec())) };
        let other = proto::Blob { raw_size: None, data: Some(BlobData::Raw(b"other".to_vec())) };
        let mut bytes = frame(OSM_HEADER, &first);
        bytes.extend(frame("Sidecar", &other));
        bytes.extend(frame(OSM_DATA, &zlib_blob(b"second")));

        let blobs: Vec<_> = BlobReader::new(Cursor::new(bytes))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(blobs.len(), 3);
        assert_eq!(blobs[0].1, b"first");
        assert_eq!(blobs[1].0.kind, "Sidecar");
        assert!(blobs[1].1.is_empty());
        assert_eq!(blobs[2].1, b"second");
    }
}
