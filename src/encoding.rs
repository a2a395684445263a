//! Fixed-width big-endian codecs for the series file: metadata, archive-info table and points.
//!
//! ```text
//! metadata     [u32 aggregation][u32 max_retention][f32 x_files_factor][u32 archive_count]
//! archive info [u32 offset][u32 seconds_per_point][u32 points]        (archive_count times)
//! data         [u32 timestamp][f64 value]                               (points per archive)
//! ```

use crate::error::StrataError;
use crate::types::{AggregationMethod, ArchiveInfo, Header, Point, Timestamp, Value};

use std::io::Read;
use std::path::Path;

pub const METADATA_SIZE: usize = 16;
pub const ARCHIVE_INFO_SIZE: usize = 12;
pub const POINT_SIZE: usize = 12;

/// Archive counts above this are treated as a corrupt header.
const MAX_ARCHIVES: u32 = 4096;

/// Size of metadata plus an archive-info table with `archive_count` entries.
#[inline]
pub const fn header_size(archive_count: usize) -> usize {
    METADATA_SIZE + ARCHIVE_INFO_SIZE * archive_count
}

pub fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}
pub fn write_f32(buf: &mut Vec<u8>, v: f32) {
    buf.extend_from_slice(&v.to_be_bytes());
}
pub fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32, StrataError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_be_bytes(b))
}
pub fn read_f32<R: Read>(r: &mut R) -> Result<f32, StrataError> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(f32::from_be_bytes(b))
}

pub fn encode_point(buf: &mut Vec<u8>, timestamp: Timestamp, value: Value) {
    write_u32(buf, timestamp);
    write_f64(buf, value);
}

/// Decodes one point from the first [`POINT_SIZE`] bytes of `bytes`.
#[inline]
pub fn decode_point(bytes: &[u8]) -> Point {
    let mut ts = [0u8; 4];
    ts.copy_from_slice(&bytes[0..4]);
    let mut val = [0u8; 8];
    val.copy_from_slice(&bytes[4..12]);
    Point::new(u32::from_be_bytes(ts), f64::from_be_bytes(val))
}

/// Iterates over all whole points in `bytes`.
pub fn decode_points(bytes: &[u8]) -> impl Iterator<Item = Point> + '_ {
    bytes.chunks_exact(POINT_SIZE).map(decode_point)
}

pub fn encode_metadata(
    buf: &mut Vec<u8>,
    aggregation_method: AggregationMethod,
    max_retention: u32,
    x_files_factor: f32,
    archive_count: u32,
) {
    write_u32(buf, aggregation_method.code());
    write_u32(buf, max_retention);
    write_f32(buf, x_files_factor);
    write_u32(buf, archive_count);
}

pub fn encode_header(header: &Header) -> Vec<u8> {
    let mut buf = Vec::with_capacity(header_size(header.archives.len()));
    encode_metadata(
        &mut buf,
        header.aggregation_method,
        header.max_retention,
        header.x_files_factor,
        header.archives.len() as u32,
    );
    for archive in &header.archives {
        write_u32(&mut buf, archive.offset);
        write_u32(&mut buf, archive.seconds_per_point);
        write_u32(&mut buf, archive.points);
    }
    buf
}

/// Reads and validates the header from the start of a series file.
///
/// `file_len` is used to reject archive tables pointing past the end of the file;
/// pass `None` when the length is unknown.
pub fn decode_header<R: Read>(
    r: &mut R,
    path: &Path,
    file_len: Option<u64>,
) -> Result<Header, StrataError> {
    let corrupt = |details: String| StrataError::CorruptFile {
        path: path.to_path_buf(),
        details,
    };

    let mut meta = [0u8; METADATA_SIZE];
    r.read_exact(&mut meta)
        .map_err(|e| corrupt(format!("unable to read metadata: {}", e)))?;
    let mut cur = &meta[..];
    let aggregation_code = read_u32(&mut cur)?;
    let max_retention = read_u32(&mut cur)?;
    let x_files_factor = read_f32(&mut cur)?;
    let archive_count = read_u32(&mut cur)?;

    let aggregation_method = AggregationMethod::from_code(aggregation_code)
        .ok_or_else(|| corrupt(format!("unknown aggregation type {}", aggregation_code)))?;
    if archive_count == 0 || archive_count > MAX_ARCHIVES {
        return Err(corrupt(format!("implausible archive count {}", archive_count)));
    }
    if !(0.0..=1.0).contains(&x_files_factor) {
        return Err(corrupt(format!("xFilesFactor {} out of range", x_files_factor)));
    }

    let mut table = vec![0u8; ARCHIVE_INFO_SIZE * archive_count as usize];
    r.read_exact(&mut table)
        .map_err(|e| corrupt(format!("unable to read archive table: {}", e)))?;

    let mut archives = Vec::with_capacity(archive_count as usize);
    let mut expected_offset = header_size(archive_count as usize) as u64;
    for (i, entry) in table.chunks_exact(ARCHIVE_INFO_SIZE).enumerate() {
        let mut cur = entry;
        let archive = ArchiveInfo {
            offset: read_u32(&mut cur)?,
            seconds_per_point: read_u32(&mut cur)?,
            points: read_u32(&mut cur)?,
        };
        if archive.seconds_per_point == 0 || archive.points == 0 {
            return Err(corrupt(format!("archive {} has an empty layout", i)));
        }
        if archive.offset as u64 != expected_offset {
            return Err(corrupt(format!(
                "archive {} starts at offset {}, expected {}",
                i, archive.offset, expected_offset
            )));
        }
        expected_offset = archive.end_offset();
        archives.push(archive);
    }

    if let Some(len) = file_len {
        if len < expected_offset {
            return Err(corrupt(format!(
                "file is {} bytes but archives end at {}",
                len, expected_offset
            )));
        }
    }

    Ok(Header {
        aggregation_method,
        max_retention,
        x_files_factor,
        archives,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_header() -> Header {
        Header {
            aggregation_method: AggregationMethod::Max,
            max_retention: 3600,
            x_files_factor: 0.5,
            archives: vec![
                ArchiveInfo {
                    offset: header_size(2) as u32,
                    seconds_per_point: 1,
                    points: 60,
                },
                ArchiveInfo {
                    offset: (header_size(2) + 60 * POINT_SIZE) as u32,
                    seconds_per_point: 60,
                    points: 60,
                },
            ],
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let bytes = encode_header(&sample_header());
        assert_eq!(bytes.len(), header_size(2));
        assert_eq!(&bytes[0..4], &[0, 0, 0, 4]);
        assert_eq!(&bytes[4..8], &3600u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0.5f32.to_be_bytes());
        assert_eq!(&bytes[12..16], &[0, 0, 0, 2]);
        assert_eq!(&bytes[16..20], &(header_size(2) as u32).to_be_bytes());
    }

    #[test]
    fn header_decodes_what_was_encoded() {
        let header = sample_header();
        let bytes = encode_header(&header);
        let decoded =
            decode_header(&mut Cursor::new(&bytes), Path::new("x.wsp"), Some(header.file_size()))
                .unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn truncated_header_is_corrupt() {
        let bytes = encode_header(&sample_header());
        let err = decode_header(&mut Cursor::new(&bytes[..20]), Path::new("x.wsp"), None);
        assert!(matches!(err, Err(StrataError::CorruptFile { .. })));
    }

    #[test]
    fn unknown_aggregation_code_is_corrupt() {
        let mut bytes = encode_header(&sample_header());
        bytes[3] = 42;
        let err = decode_header(&mut Cursor::new(&bytes), Path::new("x.wsp"), None);
        assert!(matches!(err, Err(StrataError::CorruptFile { .. })));
    }

    #[test]
    fn short_file_is_corrupt() {
        let header = sample_header();
        let bytes = encode_header(&header);
        let err = decode_header(
            &mut Cursor::new(&bytes),
            Path::new("x.wsp"),
            Some(header.file_size() - 1),
        );
        assert!(matches!(err, Err(StrataError::CorruptFile { .. })));
    }

    #[test]
    fn point_codec() {
        let mut buf = Vec::new();
        encode_point(&mut buf, 1_700_000_000, -2.5);
        assert_eq!(buf.len(), POINT_SIZE);
        assert_eq!(decode_point(&buf), Point::new(1_700_000_000, -2.5));
    }
}
