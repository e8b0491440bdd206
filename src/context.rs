//! Processing context: configuration plus xref, read, optimize and write
//! state

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{Dict, IndirectRef, ObjectStreamDict, StreamDict, XRefTable};
use crate::security::Encryption;

/// Processing mode, selects which serializer sub-flows run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read and validate only
    Read,
    /// Optimize resources and rewrite
    Optimize,
    /// Encrypt while rewriting
    Encrypt,
    /// Remove encryption while rewriting
    Decrypt,
    /// Update user access permissions
    AddPermissions,
    /// Change user or owner password
    ChangePasswords,
}

/// PDF user access permission flags
#[derive(Debug, Clone, Copy)]
pub struct PDFPermissions(u32);

impl PDFPermissions {
    /// No permissions
    pub const NONE: u32 = 0;
    /// Print the document
    pub const PRINT: u32 = 1 << 2;
    /// Modify the document
    pub const MODIFY: u32 = 1 << 3;
    /// Copy text and graphics
    pub const COPY: u32 = 1 << 4;
    /// Add or modify annotations
    pub const ANNOTATE: u32 = 1 << 5;
    /// Fill form fields
    pub const FILL_FORMS: u32 = 1 << 8;
    /// Extract text and graphics for accessibility
    pub const EXTRACT: u32 = 1 << 9;
    /// Assemble the document
    pub const ASSEMBLE: u32 = 1 << 10;
    /// Print in high quality
    pub const PRINT_HIGH: u32 = 1 << 11;
    /// All permissions
    pub const ALL: u32 = 0xF_FFFF;

    /// Create new permissions from raw bits
    pub fn new(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    /// Get raw permission bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Check if specific permission is granted
    pub fn has_permission(&self, permission: u32) -> bool {
        (self.0 & permission) == permission
    }
}

impl Default for PDFPermissions {
    fn default() -> Self {
        Self(Self::ALL)
    }
}

/// Enumerated options steering optimization and serialization
#[derive(Debug, Clone)]
pub struct Configuration {
    pub mode: Mode,
    /// Emit the xref as a stream instead of a classical table
    pub write_xref_stream: bool,
    /// Permit packing non-stream objects into object streams
    pub write_object_stream: bool,
    /// 1-based page numbers to retain, trimming the page tree
    pub extract_pages: Option<BTreeSet<usize>>,
    /// Single-page extraction number, 0 when not extracting a single page
    pub extract_page_nr: usize,
    pub encrypt_using_aes: bool,
    pub encrypt_using_128bit_key: bool,
    pub user_access_permissions: PDFPermissions,
    pub user_pw: String,
    pub owner_pw: String,
    pub user_pw_new: Option<String>,
    pub owner_pw_new: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            mode: Mode::Optimize,
            write_xref_stream: true,
            write_object_stream: true,
            extract_pages: None,
            extract_page_nr: 0,
            encrypt_using_aes: true,
            encrypt_using_128bit_key: true,
            user_access_permissions: PDFPermissions::default(),
            user_pw: String::new(),
            owner_pw: String::new(),
            user_pw_new: None,
            owner_pw_new: None,
        }
    }
}

impl Configuration {
    /// True when only a reduced catalog feature set is written, as for
    /// page extraction
    pub fn reduced_feature_set(&self) -> bool {
        self.extract_pages
            .as_ref()
            .map(|p| !p.is_empty())
            .unwrap_or(false)
    }
}

/// Facts recorded by the parser about the source file
#[derive(Debug, Clone, Default)]
pub struct ReadState {
    /// Source file used xref streams
    pub using_xref_streams: bool,
    /// Source file is linearized
    pub linearized: bool,
    /// Object-stream envelope objects of the source file
    pub object_stream_objs: HashSet<u32>,
    /// Xref-stream objects of the source file
    pub xref_stream_objs: HashSet<u32>,
    pub binary_font_size: u64,
    pub binary_font_dupl_size: u64,
    pub binary_image_size: u64,
    pub binary_image_dupl_size: u64,
}

impl ReadState {
    pub fn is_object_stream_object(&self, obj_nr: u32) -> bool {
        self.object_stream_objs.contains(&obj_nr)
    }

    pub fn is_xref_stream_object(&self, obj_nr: u32) -> bool {
        self.xref_stream_objs.contains(&obj_nr)
    }
}

/// A registered font resource
#[derive(Debug, Clone)]
pub struct FontObject {
    /// Resource names this font is registered under
    pub resource_names: Vec<String>,
    /// 6-letter subset prefix, empty for full embeds
    pub prefix: String,
    /// Font base name with any subset prefix stripped
    pub font_name: String,
    /// The font dictionary
    pub font_dict: Dict,
}

impl FontObject {
    pub fn add_resource_name(&mut self, resource_name: &str) {
        if !self.resource_names.iter().any(|n| n == resource_name) {
            self.resource_names.push(resource_name.to_string());
        }
    }

    /// A font is embedded iff its font descriptor carries a font file.
    pub fn embedded(&self, xref: &XRefTable) -> bool {
        crate::optimize::font_file_ref(xref, &self.font_dict)
            .ok()
            .flatten()
            .is_some()
    }
}

/// A registered image resource
#[derive(Debug, Clone)]
pub struct ImageObject {
    /// Resource names this image is registered under
    pub resource_names: Vec<String>,
    /// The underlying image stream dict
    pub image_dict: StreamDict,
}

impl ImageObject {
    pub fn add_resource_name(&mut self, resource_name: &str) {
        if !self.resource_names.iter().any(|n| n == resource_name) {
            self.resource_names.push(resource_name.to_string());
        }
    }
}

/// Dedup bookkeeping, created once the page count is fixed, mutated only
/// during optimization, read-only while writing.
#[derive(Debug, Clone, Default)]
pub struct OptimizeState {
    /// Font base name to registered object numbers, in registration order
    pub fonts: HashMap<String, Vec<u32>>,
    /// Canonical font objects by object number
    pub font_objects: BTreeMap<u32, FontObject>,
    /// Font object numbers used per page
    pub page_fonts: Vec<HashSet<u32>>,
    /// Redundant font dicts by their original object number
    pub duplicate_fonts: HashMap<u32, Dict>,
    /// Objects transitively owned by any duplicate font
    pub duplicate_font_objs: HashSet<u32>,
    /// Canonical image objects by object number
    pub image_objects: BTreeMap<u32, ImageObject>,
    /// Image object numbers used per page
    pub page_images: Vec<HashSet<u32>>,
    /// Redundant image stream dicts by their original object number
    pub duplicate_images: HashMap<u32, StreamDict>,
    /// Objects transitively owned by any duplicate image
    pub duplicate_image_objs: HashSet<u32>,
    /// Redundant document information dicts
    pub duplicate_info_objects: HashSet<u32>,
}

impl OptimizeState {
    pub fn is_duplicate_font_object(&self, obj_nr: u32) -> bool {
        self.duplicate_font_objs.contains(&obj_nr)
    }

    pub fn is_duplicate_image_object(&self, obj_nr: u32) -> bool {
        self.duplicate_image_objs.contains(&obj_nr)
    }

    pub fn is_duplicate_info_object(&self, obj_nr: u32) -> bool {
        self.duplicate_info_objects.contains(&obj_nr)
    }
}

/// Root catalog attributes recorded in the write stats bitmask
pub mod root_attrs {
    pub const VERSION: u32 = 1;
    pub const EXTENSIONS: u32 = 1 << 1;
    pub const PAGE_LABELS: u32 = 1 << 2;
    pub const NAMES: u32 = 1 << 3;
    pub const DESTS: u32 = 1 << 4;
    pub const VIEWER_PREFS: u32 = 1 << 5;
    pub const PAGE_LAYOUT: u32 = 1 << 6;
    pub const PAGE_MODE: u32 = 1 << 7;
    pub const OUTLINES: u32 = 1 << 8;
    pub const THREADS: u32 = 1 << 9;
    pub const OPEN_ACTION: u32 = 1 << 10;
    pub const AA: u32 = 1 << 11;
    pub const URI: u32 = 1 << 12;
    pub const ACRO_FORM: u32 = 1 << 13;
    pub const METADATA: u32 = 1 << 14;
    pub const STRUCT_TREE_ROOT: u32 = 1 << 15;
    pub const MARK_INFO: u32 = 1 << 16;
    pub const LANG: u32 = 1 << 17;
    pub const SPIDER_INFO: u32 = 1 << 18;
    pub const OUTPUT_INTENTS: u32 = 1 << 19;
    pub const PIECE_INFO: u32 = 1 << 20;
    pub const OC_PROPERTIES: u32 = 1 << 21;
    pub const PERMS: u32 = 1 << 22;
    pub const LEGAL: u32 = 1 << 23;
    pub const REQUIREMENTS: u32 = 1 << 24;
    pub const COLLECTION: u32 = 1 << 25;
    pub const NEEDS_RENDERING: u32 = 1 << 26;
}

/// Statistics collected while writing
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteStats {
    root_attrs: u32,
}

impl WriteStats {
    pub fn add_root_attr(&mut self, attr: u32) {
        self.root_attrs |= attr;
    }

    pub fn has_root_attr(&self, attr: u32) -> bool {
        (self.root_attrs & attr) == attr
    }
}

/// An object stream currently collecting packed objects
#[derive(Debug, Clone)]
pub struct CurrentObjectStream {
    /// Object number reserved for the stream envelope
    pub obj_nr: u32,
    pub builder: ObjectStreamDict,
}

/// Serializer state
#[derive(Debug, Clone, Default)]
pub struct WriteState {
    /// Object number to offset actually written to the body
    pub table: HashMap<u32, u64>,
    /// Route non-stream objects into the current object stream
    pub write_to_object_stream: bool,
    pub current_object_stream: Option<CurrentObjectStream>,
    /// Total bytes of the written file
    pub file_size: u64,
    pub stats: WriteStats,
}

impl WriteState {
    pub fn has_write_offset(&self, obj_nr: u32) -> bool {
        self.table.contains_key(&obj_nr)
    }

    pub fn write_offset(&self, obj_nr: u32) -> Option<u64> {
        self.table.get(&obj_nr).copied()
    }

    pub fn set_write_offset(&mut self, obj_nr: u32, offset: u64) {
        self.table.insert(obj_nr, offset);
    }
}

/// Single owner of all mutable state of the optimize/serialize pipeline
#[derive(Debug)]
pub struct Context {
    pub xref: XRefTable,
    pub conf: Configuration,
    pub read: ReadState,
    pub optimize: OptimizeState,
    pub write: WriteState,
    /// Active encryption material
    pub encryption: Option<Encryption>,
    /// File encryption key; None disables per-object encryption
    pub enc_key: Option<Vec<u8>>,
    /// Page count, 0 until validation or optimization fixes it
    pub page_count: usize,
    /// Version override recorded in the catalog of the source file
    pub root_version: Option<String>,
    pub optimized: bool,
}

impl Context {
    /// Create a context around a populated xref table
    pub fn new(xref: XRefTable, conf: Configuration) -> Self {
        Self {
            xref,
            conf,
            read: ReadState::default(),
            optimize: OptimizeState::default(),
            write: WriteState::default(),
            encryption: None,
            enc_key: None,
            page_count: 0,
            root_version: None,
            optimized: false,
        }
    }

    /// The catalog's page tree root reference
    pub fn pages_ref(&self) -> PDFOptResult<IndirectRef> {
        let root = self
            .xref
            .root
            .ok_or_else(|| PDFOptError::corrupt("missing document catalog"))?;
        let catalog = self
            .xref
            .dereference_dict(&crate::pdf::Object::IndirectRef(root))?
            .ok_or_else(|| PDFOptError::corrupt("catalog dereferences to null"))?;
        catalog
            .get_indirect_ref("Pages")
            .ok_or_else(|| PDFOptError::corrupt("missing indirect object ref for pages dict"))
    }

    pub fn is_linearization_object(&self, obj_nr: u32) -> bool {
        self.xref.linearization_objs.contains(&obj_nr)
    }
}
