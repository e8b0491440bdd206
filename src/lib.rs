//! PDF Optimization Library for Rust
//!
//! Optimizes a parsed PDF document in memory by deduplicating embedded
//! fonts and images, then serializes the object graph back to a
//! well-formed PDF file: body, cross-reference metadata (classical table
//! or xref stream), trailer, optional standard encryption and optional
//! page-range extraction.
//!
//! Tokenization, filter codecs beyond Flate and rendering are outside
//! this crate; it operates on a populated [`Context`] as produced by a
//! parser.
//!
//! ```
//! use pdfopt::pdf::{Dict, IndirectRef, Object, XRefTable};
//! use pdfopt::{optimize_xref_table, write_pdf, Configuration, Context};
//!
//! # fn main() -> pdfopt::PDFOptResult<()> {
//! let mut xref = XRefTable::new();
//!
//! let mut catalog = Dict::new();
//! catalog.insert("Type", Object::name("Catalog"));
//! catalog.set_indirect_ref("Pages", 2, 0);
//! xref.insert_object(1, Object::Dict(catalog));
//! xref.root = Some(IndirectRef::new(1, 0));
//!
//! let mut page = Dict::new();
//! page.insert("Type", Object::name("Page"));
//! page.set_indirect_ref("Parent", 2, 0);
//! xref.insert_object(3, Object::Dict(page));
//!
//! let mut pages = Dict::new();
//! pages.insert("Type", Object::name("Pages"));
//! pages.insert("Count", Object::Integer(1));
//! pages.insert("Kids", Object::Array(vec![Object::indirect(3, 0)]));
//! xref.insert_object(2, Object::Dict(pages));
//!
//! let mut ctx = Context::new(xref, Configuration::default());
//! optimize_xref_table(&mut ctx)?;
//!
//! let mut out = Vec::new();
//! write_pdf(&mut ctx, &mut out)?;
//! assert!(out.starts_with(b"%PDF-1.7"));
//! # Ok(())
//! # }
//! ```

mod context;
mod crypto;
mod error;
mod optimize;
pub mod pdf;
mod security;
mod write;

pub use context::{
    root_attrs, Configuration, Context, CurrentObjectStream, FontObject, ImageObject, Mode,
    OptimizeState, PDFPermissions, ReadState, WriteState, WriteStats,
};
pub use error::{PDFOptError, PDFOptResult};
pub use optimize::{
    equal_font_dicts, equal_objects, equal_stream_dicts, font_file_ref, optimize_xref_table,
};
pub use security::Encryption;
pub use write::write_pdf;
