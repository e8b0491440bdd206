//! PDF stream objects: plain streams, object streams, xref streams

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use log::{debug, trace};

use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{Dict, IndirectRef, Object};

/// Name of the sole filter this core encodes and decodes itself
pub const FLATE: &str = "FlateDecode";

/// Cap on objects packed into a single object stream
pub const OBJECT_STREAM_MAX_OBJECTS: usize = 100;

/// One stage of a stream filter pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PDFFilter {
    /// Filter name, e.g. `FlateDecode`
    pub name: String,
    /// Optional decode parameters
    pub decode_parms: Option<Dict>,
}

impl PDFFilter {
    /// Create a filter stage without decode parameters
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decode_parms: None,
        }
    }
}

/// PDF stream dict object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDict {
    /// Stream dictionary
    pub dict: Dict,
    /// Source file position of the raw bytes
    pub stream_offset: u64,
    /// Length of the encoded payload
    pub stream_length: Option<u64>,
    /// Object number of an indirect `/Length`, if the source used one
    pub stream_length_obj_nr: Option<u32>,
    /// Filters applied to the stream, outermost first
    pub filter_pipeline: Vec<PDFFilter>,
    /// Encoded payload
    pub raw: Option<Vec<u8>>,
    /// Decoded payload
    pub content: Option<Vec<u8>>,
    /// Marks content streams referenced from a page `/Contents`
    pub is_page_content: bool,
}

impl StreamDict {
    /// Create a new stream dict around a dictionary
    pub fn new(dict: Dict) -> Self {
        Self {
            dict,
            ..Default::default()
        }
    }

    /// True if exactly one filter with the given name is defined
    pub fn has_sole_filter_named(&self, filter_name: &str) -> bool {
        self.filter_pipeline.len() == 1 && self.filter_pipeline[0].name == filter_name
    }

    /// Encode `content` through the filter pipeline into `raw` and sync
    /// the `/Length` entry.
    ///
    /// Only `FlateDecode` is carried here; every other pipeline stage is
    /// the business of an external codec and reported as unsupported.
    pub fn encode(&mut self) -> PDFOptResult<()> {
        let content = self
            .content
            .as_ref()
            .ok_or_else(|| PDFOptError::corrupt("encode: stream has no content"))?;

        trace!("encoding stream with {} filters", self.filter_pipeline.len());

        let mut data = content.clone();
        for filter in &self.filter_pipeline {
            data = match filter.name.as_str() {
                FLATE => flate_encode(&data)?,
                other => return Err(PDFOptError::UnsupportedFilter(other.to_string())),
            };
        }

        self.stream_length = Some(data.len() as u64);
        self.dict.insert("Length", Object::Integer(data.len() as i64));
        self.raw = Some(data);

        Ok(())
    }

    /// Decode `raw` through the filter pipeline into `content`.
    pub fn decode(&mut self) -> PDFOptResult<()> {
        if self.content.is_some() {
            return Ok(());
        }

        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| PDFOptError::corrupt("decode: stream has no raw data"))?;

        let mut data = raw.clone();
        for filter in self.filter_pipeline.iter().rev() {
            data = match filter.name.as_str() {
                FLATE => flate_decode(&data)?,
                other => return Err(PDFOptError::UnsupportedFilter(other.to_string())),
            };
        }

        self.content = Some(data);
        Ok(())
    }
}

/// Object stream: packs multiple non-stream objects into one Flate stream
#[derive(Debug, Clone, Default)]
pub struct ObjectStreamDict {
    /// Underlying stream dict (`/Type /ObjStm`)
    pub stream: StreamDict,
    /// `objNr offset` pairs preceding the object data
    pub prolog: Vec<u8>,
    /// Number of packed objects
    pub obj_count: usize,
    /// Byte offset of the first object within the decoded stream
    pub first_obj_offset: usize,
}

impl ObjectStreamDict {
    /// Create a new, empty object stream
    pub fn new() -> Self {
        let mut dict = Dict::new();
        dict.insert("Type", Object::name("ObjStm"));
        dict.insert("Filter", Object::name(FLATE));

        let mut stream = StreamDict::new(dict);
        stream.filter_pipeline = vec![PDFFilter::named(FLATE)];

        Self {
            stream,
            prolog: Vec::new(),
            obj_count: 0,
            first_obj_offset: 0,
        }
    }

    /// True if another object still fits
    pub fn has_capacity(&self) -> bool {
        self.obj_count < OBJECT_STREAM_MAX_OBJECTS
    }

    /// Add a non-stream object, returning its index within the stream.
    pub fn add_object(&mut self, obj_nr: u32, obj: &Object) -> PDFOptResult<usize> {
        if matches!(obj, Object::Stream(_)) {
            return Err(PDFOptError::corrupt(format!(
                "object stream: cannot pack stream object #{}",
                obj_nr
            )));
        }

        let content = self.stream.content.get_or_insert_with(Vec::new);
        let offset = content.len();

        if self.obj_count > 0 {
            self.prolog.push(b' ');
        }
        self.prolog
            .extend_from_slice(format!("{} {}", obj_nr, offset).as_bytes());

        content.extend_from_slice(obj.pdf_string().as_bytes());

        let index = self.obj_count;
        self.obj_count += 1;

        trace!(
            "object stream: packed obj #{} at index {} offset {}",
            obj_nr,
            index,
            offset
        );

        Ok(index)
    }

    /// Prepend the prolog to the content and fill in `/N` and `/First`.
    pub fn finalize(&mut self) {
        let content = self.stream.content.take().unwrap_or_default();
        let mut full = self.prolog.clone();
        full.extend_from_slice(&content);

        self.first_obj_offset = self.prolog.len();
        self.stream.content = Some(full);

        self.stream.dict.insert("N", Object::Integer(self.obj_count as i64));
        self.stream
            .dict
            .insert("First", Object::Integer(self.first_obj_offset as i64));

        debug!(
            "object stream finalized: {} objects, first obj at {}",
            self.obj_count, self.first_obj_offset
        );
    }
}

/// Cross-reference stream (`/Type /XRef`)
#[derive(Debug, Clone)]
pub struct XRefStreamDict {
    /// Underlying stream dict carrying the trailer-equivalent entries
    pub stream: StreamDict,
}

impl XRefStreamDict {
    /// Create a new xref stream dict carrying root, info, ID and encrypt
    /// entries the way a classical trailer would.
    pub fn new(
        root: IndirectRef,
        info: Option<IndirectRef>,
        id: Option<&[Object]>,
        encrypt: Option<IndirectRef>,
    ) -> Self {
        let mut dict = Dict::new();
        dict.insert("Type", Object::name("XRef"));
        dict.insert("Filter", Object::name(FLATE));
        dict.insert("Root", Object::IndirectRef(root));

        if let Some(info) = info {
            dict.insert("Info", Object::IndirectRef(info));
        }
        if let Some(id) = id {
            dict.insert("ID", Object::Array(id.to_vec()));
        }
        if let Some(encrypt) = encrypt {
            dict.insert("Encrypt", Object::IndirectRef(encrypt));
        }

        let mut stream = StreamDict::new(dict);
        stream.filter_pipeline = vec![PDFFilter::named(FLATE)];

        Self { stream }
    }
}

fn flate_encode(data: &[u8]) -> PDFOptResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| PDFOptError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| PDFOptError::CompressionError(e.to_string()))
}

fn flate_decode(data: &[u8]) -> PDFOptResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PDFOptError::CompressionError(e.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_flate_round_trip() -> PDFOptResult<()> {
        let mut dict = Dict::new();
        dict.insert("Type", Object::name("XObject"));

        let mut stream = StreamDict::new(dict);
        stream.filter_pipeline = vec![PDFFilter::named(FLATE)];
        stream.content = Some(b"q 1 0 0 1 0 0 cm Q".to_vec());

        stream.encode()?;
        assert!(stream.raw.is_some());
        assert_eq!(
            stream.dict.get_integer("Length"),
            Some(stream.raw.as_ref().unwrap().len() as i64)
        );

        stream.content = None;
        stream.decode()?;
        assert_eq!(stream.content.as_deref(), Some(b"q 1 0 0 1 0 0 cm Q".as_ref()));
        Ok(())
    }

    #[test]
    fn test_unfiltered_stream_encodes_verbatim() -> PDFOptResult<()> {
        let mut stream = StreamDict::new(Dict::new());
        stream.content = Some(b"raw bytes".to_vec());
        stream.encode()?;
        assert_eq!(stream.raw.as_deref(), Some(b"raw bytes".as_ref()));
        Ok(())
    }

    #[test]
    fn test_unsupported_filter() {
        let mut stream = StreamDict::new(Dict::new());
        stream.filter_pipeline = vec![PDFFilter::named("DCTDecode")];
        stream.content = Some(vec![1, 2, 3]);
        assert!(matches!(
            stream.encode(),
            Err(PDFOptError::UnsupportedFilter(name)) if name == "DCTDecode"
        ));
    }

    #[test]
    fn test_sole_filter_named() {
        let mut stream = StreamDict::new(Dict::new());
        assert!(!stream.has_sole_filter_named(FLATE));

        stream.filter_pipeline = vec![PDFFilter::named(FLATE)];
        assert!(stream.has_sole_filter_named(FLATE));

        stream.filter_pipeline.push(PDFFilter::named("ASCIIHexDecode"));
        assert!(!stream.has_sole_filter_named(FLATE));
    }

    #[test]
    fn test_object_stream_prolog_and_offsets() -> PDFOptResult<()> {
        let mut os = ObjectStreamDict::new();

        let i0 = os.add_object(11, &Object::Integer(42))?;
        let i1 = os.add_object(12, &Object::name("Split"))?;
        assert_eq!((i0, i1), (0, 1));
        assert_eq!(os.obj_count, 2);

        // "42" occupies offsets 0..2, so obj 12 starts at 2
        assert_eq!(os.prolog, b"11 0 12 2");

        os.finalize();
        assert_eq!(os.first_obj_offset, 9);
        assert_eq!(os.stream.dict.get_integer("N"), Some(2));
        assert_eq!(os.stream.dict.get_integer("First"), Some(9));
        assert_eq!(os.stream.content.as_deref(), Some(b"11 0 12 242/Split".as_ref()));
        Ok(())
    }

    #[test]
    fn test_object_stream_rejects_streams() {
        let mut os = ObjectStreamDict::new();
        let stream_obj = Object::Stream(StreamDict::new(Dict::new()));
        assert!(os.add_object(5, &stream_obj).is_err());
    }

    #[test]
    fn test_object_stream_capacity() {
        let mut os = ObjectStreamDict::new();
        for n in 0..OBJECT_STREAM_MAX_OBJECTS {
            assert!(os.has_capacity());
            os.add_object(n as u32 + 1, &Object::Integer(n as i64)).unwrap();
        }
        assert!(!os.has_capacity());
    }

    #[test]
    fn test_xref_stream_dict_entries() {
        let id = vec![
            Object::HexLiteral(vec![1; 16]),
            Object::HexLiteral(vec![2; 16]),
        ];
        let xs = XRefStreamDict::new(
            IndirectRef::new(1, 0),
            Some(IndirectRef::new(2, 0)),
            Some(&id),
            None,
        );
        assert_eq!(xs.stream.dict.type_name(), Some("XRef"));
        assert_eq!(xs.stream.dict.get_name("Filter"), Some(FLATE));
        assert_eq!(xs.stream.dict.get_indirect_ref("Root"), Some(IndirectRef::new(1, 0)));
        assert_eq!(xs.stream.dict.get_indirect_ref("Info"), Some(IndirectRef::new(2, 0)));
        assert!(xs.stream.dict.get("Encrypt").is_none());
    }
}
