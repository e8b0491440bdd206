//! PDF object model and cross-reference table

mod dict;
mod object;
mod stream;
mod xref;

pub use dict::Dict;
pub use object::{IndirectRef, Object};
pub use stream::{
    ObjectStreamDict, PDFFilter, StreamDict, XRefStreamDict, FLATE, OBJECT_STREAM_MAX_OBJECTS,
};
pub use xref::{XRefEntry, XRefTable, FREE_HEAD_GENERATION};
