//! Serializer: emits header, body, cross-reference metadata and trailer
//! for the object graph held by a context.
//!
//! The top-level order is fixed: prepare (Info dict, file ID, encryption),
//! header, root object with page tree, info dict, additional streams,
//! encrypt dict, redundant-object freeing, xref, trailer.

use std::io::{BufWriter, Write};

use log::{debug, info, trace, warn};
use md5::{Digest, Md5};
use rand::{thread_rng, RngCore};

use crate::context::{root_attrs, Context, CurrentObjectStream, Mode};
use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{
    Dict, IndirectRef, Object, ObjectStreamDict, StreamDict, XRefEntry, XRefStreamDict,
};
use crate::security;

const HEADER_VERSION: &str = "1.7";
// 4 bytes >= 0x80 marking the file as binary
const BINARY_MARKER: [u8; 4] = [0xe2, 0xe3, 0xcf, 0xd3];

// Catalog entries excluded when writing a reduced feature set, as for
// page extraction.
const REDUCED_FEATURE_SET_KEYS: [&str; 7] = [
    "Names",
    "Dests",
    "Outlines",
    "OpenAction",
    "AcroForm",
    "StructTreeRoot",
    "OCProperties",
];

// Root entries written after the page tree, first batch.
const ROOT_ENTRIES_PRE_STRUCT: [(&str, u32); 14] = [
    ("Extensions", root_attrs::EXTENSIONS),
    ("PageLabels", root_attrs::PAGE_LABELS),
    ("Names", root_attrs::NAMES),
    ("Dests", root_attrs::DESTS),
    ("ViewerPreferences", root_attrs::VIEWER_PREFS),
    ("PageLayout", root_attrs::PAGE_LAYOUT),
    ("PageMode", root_attrs::PAGE_MODE),
    ("Outlines", root_attrs::OUTLINES),
    ("Threads", root_attrs::THREADS),
    ("OpenAction", root_attrs::OPEN_ACTION),
    ("AA", root_attrs::AA),
    ("URI", root_attrs::URI),
    ("AcroForm", root_attrs::ACRO_FORM),
    ("Metadata", root_attrs::METADATA),
];

// Root entries written after StructTreeRoot, second batch.
const ROOT_ENTRIES_POST_STRUCT: [(&str, u32); 11] = [
    ("MarkInfo", root_attrs::MARK_INFO),
    ("Lang", root_attrs::LANG),
    ("SpiderInfo", root_attrs::SPIDER_INFO),
    ("OutputIntents", root_attrs::OUTPUT_INTENTS),
    ("PieceInfo", root_attrs::PIECE_INFO),
    ("OCProperties", root_attrs::OC_PROPERTIES),
    ("Perms", root_attrs::PERMS),
    ("Legal", root_attrs::LEGAL),
    ("Requirements", root_attrs::REQUIREMENTS),
    ("Collection", root_attrs::COLLECTION),
    ("NeedsRendering", root_attrs::NEEDS_RENDERING),
];

/// Buffered byte sink that tracks the current file offset.
struct Sink<W: Write> {
    w: BufWriter<W>,
    offset: u64,
}

impl<W: Write> Sink<W> {
    fn new(w: W) -> Self {
        Self {
            w: BufWriter::new(w),
            offset: 0,
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> PDFOptResult<()> {
        self.w.write_all(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> PDFOptResult<()> {
        self.write_all(s.as_bytes())
    }

    fn write_eol(&mut self) -> PDFOptResult<()> {
        self.write_all(b"\n")
    }

    fn flush(&mut self) -> PDFOptResult<()> {
        self.w.flush()?;
        Ok(())
    }
}

/// Serialize the context's object graph as a well-formed PDF file into
/// the given sink.
pub fn write_pdf<W: Write>(ctx: &mut Context, sink: W) -> PDFOptResult<()> {
    let mut s = Sink::new(sink);

    prepare_for_writing(ctx)?;

    // File attachments via PDF collections require 1.7.
    write_header(&mut s)?;
    debug!("offset after header: {}", s.offset);

    write_root_object(ctx, &mut s)?;
    debug!("offset after root object: {}", s.offset);

    write_document_info_dict(ctx, &mut s)?;
    debug!("offset after info dict: {}", s.offset);

    if let Some(streams) = ctx.xref.additional_streams.clone() {
        for obj in &streams {
            write_deep_object(ctx, &mut s, obj)?;
        }
    }

    write_encrypt_dict(ctx, &mut s)?;

    // Mark redundant objects as free: duplicate resources, leftover
    // object/xref stream envelopes, linearization dicts.
    delete_redundant_objects(ctx)?;

    write_xref(ctx, &mut s)?;

    s.write_str("%%EOF")?;
    s.write_eol()?;

    s.flush()?;
    ctx.write.file_size = s.offset;

    log_write_stats(ctx);
    Ok(())
}

fn prepare_for_writing(ctx: &mut Context) -> PDFOptResult<()> {
    ensure_info_dict(ctx)?;
    ensure_file_id(ctx)?;
    handle_encryption(ctx)
}

fn ensure_info_dict(ctx: &mut Context) -> PDFOptResult<()> {
    let producer = format!("pdfopt v{}", env!("CARGO_PKG_VERSION"));

    match ctx.xref.info {
        None => {
            let mut info = Dict::new();
            info.insert("Producer", Object::string_lit(producer));
            let obj_nr = ctx.xref.insert_and_use_recycled(XRefEntry::InUse {
                object: Object::Dict(info),
                generation: 0,
                offset: None,
            })?;
            ctx.xref.info = Some(IndirectRef::new(obj_nr, 0));
            debug!("created info dict at obj #{}", obj_nr);
        }
        Some(r) => {
            let mut dict = ctx
                .xref
                .dereference_dict(&Object::IndirectRef(r))?
                .ok_or_else(|| PDFOptError::corrupt("info dict dereferences to null"))?;
            dict.insert("Producer", Object::string_lit(producer));
            ctx.xref.update_object(r.obj_nr, Object::Dict(dict))?;
        }
    }

    Ok(())
}

// A fresh 16-byte file ID element.
fn file_id() -> Object {
    let mut seed = [0u8; 32];
    thread_rng().fill_bytes(&mut seed);
    let mut hasher = Md5::new();
    hasher.update(seed);
    Object::HexLiteral(hasher.finalize().to_vec())
}

fn ensure_file_id(ctx: &mut Context) -> PDFOptResult<()> {
    let fid = file_id();

    match &mut ctx.xref.id {
        None => {
            ctx.xref.id = Some(vec![fid.clone(), fid]);
        }
        Some(arr) => {
            if arr.len() != 2 {
                return Err(PDFOptError::corrupt("ID must be an array with 2 elements"));
            }
            // rewrites keep the original first element
            arr[1] = fid;
        }
    }

    Ok(())
}

fn id_first_element(ctx: &Context) -> PDFOptResult<Vec<u8>> {
    let arr = ctx
        .xref
        .id
        .as_ref()
        .ok_or_else(|| PDFOptError::encryption("missing file ID"))?;
    match arr.first() {
        Some(Object::HexLiteral(b)) | Some(Object::StringLiteral(b)) => Ok(b.clone()),
        _ => Err(PDFOptError::encryption("file ID element is not a string")),
    }
}

fn handle_encryption(ctx: &mut Context) -> PDFOptResult<()> {
    if ctx.conf.mode == Mode::Encrypt || ctx.conf.mode == Mode::Decrypt {
        if ctx.conf.mode == Mode::Decrypt {
            // remove encryption: object emission skips per-object crypto
            ctx.enc_key = None;
        } else {
            setup_encryption(ctx)?;
        }
    } else if ctx.conf.user_pw_new.is_some()
        || ctx.conf.owner_pw_new.is_some()
        || ctx.conf.mode == Mode::AddPermissions
    {
        update_encryption(ctx)?;
    }

    // Encrypting compressed object streams is unsupported here: a
    // classical-xref input gets classical xref and inline objects.
    if ctx.xref.encrypt.is_some() && ctx.enc_key.is_some() && !ctx.read.using_xref_streams {
        ctx.conf.write_object_stream = false;
        ctx.conf.write_xref_stream = false;
    }

    Ok(())
}

fn setup_encryption(ctx: &mut Context) -> PDFOptResult<()> {
    let id = id_first_element(ctx)
        .map_err(|_| PDFOptError::encryption("encrypt: missing ID"))?;

    let p = security::permissions_value(ctx.conf.user_access_permissions.bits());
    let mut dict = security::new_encrypt_dict(
        ctx.conf.encrypt_using_aes,
        ctx.conf.encrypt_using_128bit_key,
        p,
    );

    let (v, r, key_length) = security::version_and_revision(
        ctx.conf.encrypt_using_aes,
        ctx.conf.encrypt_using_128bit_key,
    );
    ctx.encryption = Some(security::Encryption {
        v,
        r,
        key_length,
        p,
        o: Vec::new(),
        u: Vec::new(),
        id,
    });

    let o = security::compute_o_value(ctx)?;
    ctx.encryption.as_mut().expect("just set").o = o.clone();

    let (u, enc_key) = security::compute_u_value(ctx)?;
    ctx.encryption.as_mut().expect("just set").u = u.clone();
    ctx.enc_key = Some(enc_key);

    dict.insert("O", Object::HexLiteral(o));
    dict.insert("U", Object::HexLiteral(u));

    let obj_nr = ctx.xref.insert_and_use_recycled(XRefEntry::InUse {
        object: Object::Dict(dict),
        generation: 0,
        offset: None,
    })?;
    ctx.xref.encrypt = Some(IndirectRef::new(obj_nr, 0));

    info!("installed encryption dict at obj #{}", obj_nr);
    Ok(())
}

fn update_encryption(ctx: &mut Context) -> PDFOptResult<()> {
    let encrypt_ref = ctx
        .xref
        .encrypt
        .ok_or_else(|| PDFOptError::encryption("document is not encrypted"))?;

    let mut dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(encrypt_ref))?
        .ok_or_else(|| PDFOptError::encryption("encrypt dict dereferences to null"))?;

    let id = id_first_element(ctx)?;
    let mut enc = security::encryption_from_dict(&dict, id)?;

    if ctx.conf.mode == Mode::AddPermissions {
        enc.p = security::permissions_value(ctx.conf.user_access_permissions.bits());
        dict.insert("P", Object::Integer(enc.p as i64));
        // U depends on P and is recomputed below
    }

    ctx.encryption = Some(enc);

    if let Some(pw) = ctx.conf.user_pw_new.take() {
        ctx.conf.user_pw = pw;
    }
    if let Some(pw) = ctx.conf.owner_pw_new.take() {
        ctx.conf.owner_pw = pw;
    }

    let o = security::compute_o_value(ctx)?;
    ctx.encryption.as_mut().expect("just set").o = o.clone();
    dict.insert("O", Object::HexLiteral(o));

    let (u, enc_key) = security::compute_u_value(ctx)?;
    ctx.encryption.as_mut().expect("just set").u = u.clone();
    ctx.enc_key = Some(enc_key);
    dict.insert("U", Object::HexLiteral(u));

    ctx.xref.update_object(encrypt_ref.obj_nr, Object::Dict(dict))?;
    Ok(())
}

fn write_header(s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    s.write_str(&format!("%PDF-{}", HEADER_VERSION))?;
    s.write_eol()?;
    s.write_all(b"%")?;
    s.write_all(&BINARY_MARKER)?;
    s.write_eol()
}

// 7.7.2 Document catalog.
fn write_root_object(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    let catalog = ctx
        .xref
        .root
        .ok_or_else(|| PDFOptError::corrupt("missing document catalog"))?;
    trace!("writing root object #{} at offset {}", catalog.obj_nr, s.offset);

    let mut dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(catalog))?
        .ok_or_else(|| PDFOptError::corrupt("unable to dereference root dict"))?;

    // The version carried by the catalog of the source file does not
    // survive; the header fixes the version.
    if ctx.root_version.is_some() {
        dict.remove("Version");
    }

    if ctx.conf.reduced_feature_set() {
        debug!("excluding complex catalog entries for page extraction");
        for key in REDUCED_FEATURE_SET_KEYS {
            dict.remove(key);
        }
    }

    ctx.xref
        .update_object(catalog.obj_nr, Object::Dict(dict.clone()))?;

    write_object_value(
        ctx,
        s,
        catalog.obj_nr,
        catalog.gen_nr,
        &Object::Dict(dict.clone()),
    )?;

    write_root_entry(ctx, s, &dict, "Version", root_attrs::VERSION)?;

    write_pages(ctx, s, &dict)?;

    for (entry_name, attr) in ROOT_ENTRIES_PRE_STRUCT {
        write_root_entry(ctx, s, &dict, entry_name, attr)?;
    }

    write_root_entry_to_obj_stream(ctx, s, &dict, "StructTreeRoot", root_attrs::STRUCT_TREE_ROOT)?;

    for (entry_name, attr) in ROOT_ENTRIES_POST_STRUCT {
        write_root_entry(ctx, s, &dict, entry_name, attr)?;
    }

    trace!("root object done at offset {}", s.offset);
    Ok(())
}

// Write one catalog entry and everything it references; record it in the
// stats bitmask if present.
fn write_root_entry(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    dict: &Dict,
    entry_name: &str,
    stats_attr: u32,
) -> PDFOptResult<()> {
    let obj = match dict.get(entry_name) {
        Some(Object::Null) | None => return Ok(()),
        Some(o) => o.clone(),
    };

    write_deep_object(ctx, s, &obj)?;
    ctx.write.stats.add_root_attr(stats_attr);
    Ok(())
}

fn write_root_entry_to_obj_stream(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    dict: &Dict,
    entry_name: &str,
    stats_attr: u32,
) -> PDFOptResult<()> {
    ctx.write.write_to_object_stream = true;
    write_root_entry(ctx, s, dict, entry_name, stats_attr)?;
    stop_object_stream(ctx, s)
}

fn write_pages(ctx: &mut Context, s: &mut Sink<impl Write>, root_dict: &Dict) -> PDFOptResult<()> {
    let pages_ref = root_dict
        .get_indirect_ref("Pages")
        .ok_or_else(|| PDFOptError::corrupt("missing indirect object ref for pages dict"))?;

    if ctx.conf.reduced_feature_set() {
        let mut p = 0usize;
        let count = trim_pages_dict(ctx, pages_ref, &mut p)?;
        debug!("page tree trimmed to {} pages", count);
        if count == 0 {
            return Err(PDFOptError::corrupt("page extraction selects no pages"));
        }
    }

    // page tree objects go into object streams
    ctx.write.write_to_object_stream = true;
    write_indirect_object(ctx, s, pages_ref)?;
    stop_object_stream(ctx, s)
}

// Prune the page tree to the selected 1-based page numbers. Returns the
// number of surviving descendants; emptied Pages nodes are dropped from
// their parent's Kids.
fn trim_pages_dict(ctx: &mut Context, pages_ref: IndirectRef, p: &mut usize) -> PDFOptResult<usize> {
    let mut dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(pages_ref))?
        .ok_or_else(|| PDFOptError::corrupt("pages node dereferences to null"))?;

    let kids = ctx
        .xref
        .dereference_array(dict.get("Kids").unwrap_or(&Object::Null))?
        .ok_or_else(|| PDFOptError::corrupt("malformed Kids array"))?;

    let selected = ctx.conf.extract_pages.clone().unwrap_or_default();

    let mut surviving_kids = Vec::new();
    let mut count = 0usize;

    for kid in kids {
        let kid_ref = kid
            .as_indirect_ref()
            .ok_or_else(|| PDFOptError::corrupt("page node kid is not an indirect ref"))?;
        let node = ctx
            .xref
            .dereference_dict(&kid)?
            .ok_or_else(|| PDFOptError::corrupt("page node dereferences to null"))?;

        match node.type_name() {
            Some("Pages") => {
                let c = trim_pages_dict(ctx, kid_ref, p)?;
                if c > 0 {
                    set_parent(ctx, kid_ref, pages_ref)?;
                    surviving_kids.push(kid);
                    count += c;
                }
            }
            Some("Page") => {
                *p += 1;
                if selected.contains(p) {
                    trace!("keeping page {} at obj #{}", p, kid_ref.obj_nr);
                    set_parent(ctx, kid_ref, pages_ref)?;
                    surviving_kids.push(kid);
                    count += 1;
                }
            }
            Some(other) => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Page",
                    found: other.to_string(),
                })
            }
            None => return Err(PDFOptError::missing("Type")),
        }
    }

    dict.insert("Count", Object::Integer(count as i64));
    dict.insert("Kids", Object::Array(surviving_kids));
    ctx.xref.update_object(pages_ref.obj_nr, Object::Dict(dict))?;

    Ok(count)
}

fn set_parent(ctx: &mut Context, child: IndirectRef, parent: IndirectRef) -> PDFOptResult<()> {
    let mut dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(child))?
        .ok_or_else(|| PDFOptError::corrupt("page tree node dereferences to null"))?;
    dict.insert("Parent", Object::IndirectRef(parent));
    ctx.xref.update_object(child.obj_nr, Object::Dict(dict))
}

fn write_document_info_dict(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    if let Some(info) = ctx.xref.info {
        write_deep_object(ctx, s, &Object::IndirectRef(info))?;
    }
    Ok(())
}

fn write_encrypt_dict(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    // nothing to write unless the output is actually encrypted
    let (encrypt_ref, _) = match (ctx.xref.encrypt, ctx.enc_key.as_ref()) {
        (Some(r), Some(k)) => (r, k),
        _ => return Ok(()),
    };

    let dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(encrypt_ref))?
        .ok_or_else(|| PDFOptError::encryption("encrypt dict dereferences to null"))?;

    // the encrypt dict itself is never encrypted
    write_object(ctx, s, encrypt_ref.obj_nr, encrypt_ref.gen_nr, &dict.pdf_string())
}

/// Write an object and everything reachable from it.
fn write_deep_object(ctx: &mut Context, s: &mut Sink<impl Write>, obj: &Object) -> PDFOptResult<()> {
    match obj {
        Object::IndirectRef(r) => write_indirect_object(ctx, s, *r),
        Object::Dict(d) => {
            for (_, value) in d.iter() {
                write_deep_object(ctx, s, value)?;
            }
            Ok(())
        }
        Object::Array(a) => {
            for value in a {
                write_deep_object(ctx, s, value)?;
            }
            Ok(())
        }
        Object::Stream(sd) => {
            for (_, value) in sd.dict.iter() {
                write_deep_object(ctx, s, value)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn write_indirect_object(ctx: &mut Context, s: &mut Sink<impl Write>, r: IndirectRef) -> PDFOptResult<()> {
    if ctx.write.has_write_offset(r.obj_nr) {
        return Ok(());
    }

    let (object, gen_nr) = match ctx.xref.find(r.obj_nr) {
        None => return Err(PDFOptError::ObjectNotFound(r.obj_nr)),
        Some(XRefEntry::Free { .. }) => {
            trace!("skipping freed object #{}", r.obj_nr);
            return Ok(());
        }
        Some(XRefEntry::InUse {
            object, generation, ..
        }) => (object.clone(), *generation),
        Some(XRefEntry::Compressed { object, .. }) => (object.clone(), 0),
    };

    write_object_value(ctx, s, r.obj_nr, gen_nr, &object)?;

    // children follow their parent; the recorded offset breaks ref cycles
    match &object {
        Object::Stream(sd) => {
            for (key, value) in sd.dict.iter() {
                // an indirect /Length of the source is superseded by the
                // direct value synced at emission
                if key == "Length" && sd.stream_length_obj_nr.is_some() {
                    continue;
                }
                write_deep_object(ctx, s, value)?;
            }
        }
        other => write_deep_object(ctx, s, other)?,
    }

    Ok(())
}

// Emit one object: streams always inline, non-stream generation-0
// objects into the current object stream while packing is on.
fn write_object_value(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    obj_nr: u32,
    gen_nr: u16,
    object: &Object,
) -> PDFOptResult<()> {
    if ctx.write.has_write_offset(obj_nr) {
        return Ok(());
    }

    match object {
        Object::Stream(sd) => {
            let mut sd = sd.clone();
            write_stream_dict_object(ctx, s, obj_nr, gen_nr, &mut sd, true)
        }
        _ => {
            if ctx.conf.write_object_stream && ctx.write.write_to_object_stream && gen_nr == 0 {
                write_to_object_stream(ctx, s, obj_nr, object)
            } else {
                let payload = match encryption_key_for(ctx, obj_nr, gen_nr) {
                    Some((key, aes)) => {
                        let mut clone = object.clone();
                        security::encrypt_deep_object(&mut clone, &key, aes)?;
                        clone.pdf_string()
                    }
                    None => object.pdf_string(),
                };
                write_object(ctx, s, obj_nr, gen_nr, &payload)
            }
        }
    }
}

// The per-object key, unless encryption is off or the object is the
// encrypt dict itself.
fn encryption_key_for(ctx: &Context, obj_nr: u32, gen_nr: u16) -> Option<(Vec<u8>, bool)> {
    let enc_key = ctx.enc_key.as_ref()?;
    if ctx.xref.encrypt.map(|r| r.obj_nr) == Some(obj_nr) {
        return None;
    }
    let aes = ctx
        .encryption
        .as_ref()
        .map(|e| e.uses_aes())
        .unwrap_or(false);
    Some((security::object_key(enc_key, obj_nr, gen_nr, aes), aes))
}

// Emit `N G obj\n<payload>\nendobj\n`, recording the offset first.
// A second call for the same object number is a no-op.
fn write_object(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    obj_nr: u32,
    gen_nr: u16,
    payload: &str,
) -> PDFOptResult<()> {
    if ctx.write.has_write_offset(obj_nr) {
        return Ok(());
    }

    ctx.write.set_write_offset(obj_nr, s.offset);
    s.write_str(&format!("{} {} obj", obj_nr, gen_nr))?;
    s.write_eol()?;
    s.write_str(payload)?;
    s.write_eol()?;
    s.write_str("endobj")?;
    s.write_eol()
}

fn write_stream_dict_object(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    obj_nr: u32,
    gen_nr: u16,
    sd: &mut StreamDict,
    allow_encrypt: bool,
) -> PDFOptResult<()> {
    if ctx.write.has_write_offset(obj_nr) {
        return Ok(());
    }

    if sd.raw.is_none() {
        if sd.content.is_some() {
            sd.encode()?;
        } else {
            warn!("stream obj #{} has neither raw nor content data", obj_nr);
            sd.raw = Some(Vec::new());
        }
    }

    let raw_len = sd.raw.as_ref().expect("raw ensured above").len();
    sd.stream_length = Some(raw_len as u64);
    sd.dict.insert("Length", Object::Integer(raw_len as i64));

    if allow_encrypt {
        if let Some((key, aes)) = encryption_key_for(ctx, obj_nr, gen_nr) {
            let mut wrapped = Object::Stream(sd.clone());
            security::encrypt_deep_object(&mut wrapped, &key, aes)?;
            if let Object::Stream(encrypted) = wrapped {
                *sd = encrypted;
            }
        }
    }

    ctx.write.set_write_offset(obj_nr, s.offset);
    s.write_str(&format!("{} {} obj", obj_nr, gen_nr))?;
    s.write_eol()?;
    s.write_str(&sd.dict.pdf_string())?;
    s.write_str("\nstream\n")?;
    s.write_all(sd.raw.as_ref().expect("raw ensured above"))?;
    s.write_str("\nendstream\nendobj")?;
    s.write_eol()
}

// Route a non-stream object into the current object stream, opening or
// rolling the stream as needed. The object keeps a write offset so the
// redundancy check and xref key selection treat it as written.
fn write_to_object_stream(
    ctx: &mut Context,
    s: &mut Sink<impl Write>,
    obj_nr: u32,
    object: &Object,
) -> PDFOptResult<()> {
    let full = matches!(
        &ctx.write.current_object_stream,
        Some(cur) if !cur.builder.has_capacity()
    );
    if full {
        stop_object_stream(ctx, s)?;
        ctx.write.write_to_object_stream = true;
    }

    if ctx.write.current_object_stream.is_none() {
        let stream_nr = ctx.xref.insert_and_use_recycled(XRefEntry::InUse {
            object: Object::Null,
            generation: 0,
            offset: None,
        })?;
        trace!("opened object stream at obj #{}", stream_nr);
        ctx.write.current_object_stream = Some(CurrentObjectStream {
            obj_nr: stream_nr,
            builder: ObjectStreamDict::new(),
        });
    }

    let cur = ctx
        .write
        .current_object_stream
        .as_mut()
        .expect("opened above");
    let index = cur.builder.add_object(obj_nr, object)?;
    let stream_nr = cur.obj_nr;

    ctx.xref.insert(
        obj_nr,
        XRefEntry::Compressed {
            object: object.clone(),
            object_stream: stream_nr,
            index,
        },
    );
    ctx.write.set_write_offset(obj_nr, s.offset);

    Ok(())
}

// Finalize the current object stream, encode it and write its envelope
// inline. Packing is off afterwards.
fn stop_object_stream(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    if let Some(mut cur) = ctx.write.current_object_stream.take() {
        cur.builder.finalize();

        let mut sd = cur.builder.stream;
        sd.encode()?;

        ctx.xref.insert(
            cur.obj_nr,
            XRefEntry::InUse {
                object: Object::Stream(sd.clone()),
                generation: 0,
                offset: None,
            },
        );
        write_stream_dict_object(ctx, s, cur.obj_nr, 0, &mut sd, true)?;
        debug!("object stream obj #{} written", cur.obj_nr);
    }

    ctx.write.write_to_object_stream = false;
    Ok(())
}

// Free every object that did not make it into the output and is known
// redundant. Runs after all body emission: a write offset proves the
// object is referenced from a surviving path.
fn delete_redundant_objects(ctx: &mut Context) -> PDFOptResult<()> {
    let size = ctx.xref.size;
    debug!("deleting redundant objects, size={}", size);

    for i in 0..size {
        let (is_free, is_stream, offset) = match ctx.xref.find(i) {
            // missing object remains missing
            None => continue,
            Some(entry) => (
                entry.is_free(),
                matches!(entry.object(), Some(Object::Stream(_))),
                match entry {
                    XRefEntry::InUse { offset, .. } => *offset,
                    _ => None,
                },
            ),
        };

        if is_free {
            continue;
        }

        if ctx.write.has_write_offset(i) {
            // Resources may be cross-referenced from several objects,
            // e.g. font descriptors shared by different font dicts.
            ctx.optimize.duplicate_font_objs.remove(&i);
            ctx.optimize.duplicate_image_objs.remove(&i);
            ctx.optimize.duplicate_info_objects.remove(&i);
            continue;
        }

        // Linearization dicts carry no type entry, so every unwritten
        // stream dict is checked against the recorded hint offsets.
        if ctx.read.linearized && is_stream && offset.is_some() {
            if offset == ctx.xref.offset_primary_hint_table
                || (ctx.xref.offset_overflow_hint_table.is_some()
                    && offset == ctx.xref.offset_overflow_hint_table)
            {
                ctx.xref.linearization_objs.insert(i);
                debug!("hint table at obj #{}", i);
            }
        }

        delete_redundant_object(ctx, i)?;
    }

    Ok(())
}

fn delete_redundant_object(ctx: &mut Context, obj_nr: u32) -> PDFOptResult<()> {
    if ctx.conf.extract_page_nr == 0
        && (ctx.optimize.is_duplicate_font_object(obj_nr)
            || ctx.optimize.is_duplicate_image_object(obj_nr))
    {
        ctx.xref.delete_object(obj_nr)?;
    }

    let still_in_use = ctx.xref.find(obj_nr).map(|e| !e.is_free()).unwrap_or(false);
    if still_in_use
        && (ctx.is_linearization_object(obj_nr)
            || ctx.optimize.is_duplicate_info_object(obj_nr)
            || ctx.read.is_object_stream_object(obj_nr)
            || ctx.read.is_xref_stream_object(obj_nr))
    {
        ctx.xref.delete_object(obj_nr)?;
    }

    Ok(())
}

fn write_xref(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    if ctx.conf.write_xref_stream {
        write_xref_stream(ctx, s)
    } else {
        write_xref_table(ctx, s)
    }
}

// Object numbers that appear in the emitted xref: free entries plus
// everything actually written.
fn sorted_writable_keys(ctx: &Context) -> Vec<u32> {
    let mut keys: Vec<u32> = (0..ctx.xref.size)
        .filter(|&i| match ctx.xref.find(i) {
            Some(entry) => entry.is_free() || ctx.write.has_write_offset(i),
            None => false,
        })
        .collect();
    keys.sort_unstable();
    keys
}

fn write_xref_table(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    ctx.xref.ensure_valid_free_list()?;

    let keys = sorted_writable_keys(ctx);
    debug!("xref has {} entries", keys.len());

    let xref_offset = s.offset;

    s.write_str("xref")?;
    s.write_eol()?;

    let mut start = keys[0];
    let mut size = 1u32;
    for i in 1..keys.len() {
        if keys[i] - keys[i - 1] > 1 {
            write_xref_subsection(ctx, s, start, size)?;
            start = keys[i];
            size = 1;
        } else {
            size += 1;
        }
    }
    write_xref_subsection(ctx, s, start, size)?;

    write_trailer_dict(ctx, s)?;
    s.write_eol()?;

    s.write_str("startxref")?;
    s.write_eol()?;
    s.write_str(&format!("{}", xref_offset))?;
    s.write_eol()
}

fn write_xref_subsection(
    ctx: &Context,
    s: &mut Sink<impl Write>,
    start: u32,
    size: u32,
) -> PDFOptResult<()> {
    trace!("xref subsection start={} size={}", start, size);

    s.write_str(&format!("{} {}", start, size))?;
    s.write_eol()?;

    for i in start..start + size {
        let entry = ctx
            .xref
            .find(i)
            .ok_or_else(|| PDFOptError::invariant(format!("missing xref entry #{}", i)))?;

        // 20 bytes per line, 2-byte EOL
        let line = match entry {
            XRefEntry::Free {
                next_free,
                generation,
            } => format!("{:010} {:05} f\r\n", next_free, generation),
            XRefEntry::InUse { generation, .. } => {
                let offset = ctx.write.write_offset(i).unwrap_or(0);
                format!("{:010} {:05} n\r\n", offset, generation)
            }
            XRefEntry::Compressed { .. } => {
                return Err(PDFOptError::invariant(
                    "compressed entries present in classical xref",
                ))
            }
        };
        s.write_str(&line)?;
    }

    Ok(())
}

fn write_trailer_dict(ctx: &Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    let root = ctx
        .xref
        .root
        .ok_or_else(|| PDFOptError::corrupt("missing document catalog"))?;

    s.write_str("trailer")?;
    s.write_eol()?;

    let mut dict = Dict::new();
    dict.insert("Size", Object::Integer(ctx.xref.size as i64));
    dict.insert("Root", Object::IndirectRef(root));

    if let Some(info) = ctx.xref.info {
        dict.insert("Info", Object::IndirectRef(info));
    }
    if ctx.enc_key.is_some() {
        if let Some(encrypt) = ctx.xref.encrypt {
            dict.insert("Encrypt", Object::IndirectRef(encrypt));
        }
    }
    if let Some(id) = &ctx.xref.id {
        dict.insert("ID", Object::Array(id.clone()));
    }

    s.write_str(&dict.pdf_string())
}

// Big-endian representation of v in exactly `width` bytes.
fn int_to_buf(v: u64, width: usize) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.len().saturating_sub(width);
    let mut out = vec![0u8; width.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes[start..]);
    out
}

fn byte_width(mut v: u64) -> usize {
    let mut n = 0;
    while v > 0 {
        v >>= 8;
        n += 1;
    }
    n.max(1)
}

// Entry data and Index array of the xref stream.
fn create_xref_stream_data(
    ctx: &Context,
    w1: usize,
    w2: usize,
    w3: usize,
) -> PDFOptResult<(Vec<u8>, Vec<Object>)> {
    let keys = sorted_writable_keys(ctx);
    debug!("xref stream has {} entries", keys.len());

    let mut buf = Vec::new();
    let mut index = Vec::new();

    let mut start = keys[0];
    let mut size = 0u32;

    for (i, &key) in keys.iter().enumerate() {
        let entry = ctx
            .xref
            .find(key)
            .ok_or_else(|| PDFOptError::invariant(format!("missing xref entry #{}", key)))?;

        let (t, f2, f3) = match entry {
            XRefEntry::Free {
                next_free,
                generation,
            } => (0u64, *next_free as u64, *generation as u64),
            XRefEntry::Compressed {
                object_stream,
                index,
                ..
            } => (2, *object_stream as u64, *index as u64),
            XRefEntry::InUse { generation, .. } => {
                let offset = ctx.write.write_offset(key).ok_or_else(|| {
                    PDFOptError::invariant(format!("missing write offset for obj #{}", key))
                })?;
                (1, offset, *generation as u64)
            }
        };

        buf.extend_from_slice(&int_to_buf(t, w1));
        buf.extend_from_slice(&int_to_buf(f2, w2));
        buf.extend_from_slice(&int_to_buf(f3, w3));

        if i > 0 && key - keys[i - 1] > 1 {
            index.push(Object::Integer(start as i64));
            index.push(Object::Integer(size as i64));
            start = key;
            size = 1;
        } else {
            size += 1;
        }
    }

    index.push(Object::Integer(start as i64));
    index.push(Object::Integer(size as i64));

    Ok((buf, index))
}

fn write_xref_stream(ctx: &mut Context, s: &mut Sink<impl Write>) -> PDFOptResult<()> {
    let root = ctx
        .xref
        .root
        .ok_or_else(|| PDFOptError::corrupt("missing document catalog"))?;

    let encrypt = if ctx.enc_key.is_some() {
        ctx.xref.encrypt
    } else {
        None
    };
    let xref_stream = XRefStreamDict::new(root, ctx.xref.info, ctx.xref.id.as_deref(), encrypt);

    // the stream envelope reuses a recycled object number when possible
    let obj_nr = ctx.xref.insert_and_use_recycled(XRefEntry::InUse {
        object: Object::Null,
        generation: 0,
        offset: None,
    })?;

    // after the last insert of an object
    ctx.xref.ensure_valid_free_list()?;

    let mut sd = xref_stream.stream;
    sd.dict.insert("Size", Object::Integer(ctx.xref.size as i64));

    let xref_offset = s.offset;

    // field widths: type fits one byte, the middle field covers the
    // larger of table size and current offset, the index field two bytes
    let w1 = 1;
    let w2 = byte_width((ctx.xref.size as u64).max(xref_offset));
    let w3 = 2;
    sd.dict.insert(
        "W",
        Object::Array(vec![
            Object::Integer(w1 as i64),
            Object::Integer(w2 as i64),
            Object::Integer(w3 as i64),
        ]),
    );

    let (content, index) = create_xref_stream_data(ctx, w1, w2, w3)?;
    sd.content = Some(content);
    sd.dict.insert("Index", Object::Array(index));

    sd.encode()?;

    ctx.xref.insert(
        obj_nr,
        XRefEntry::InUse {
            object: Object::Stream(sd.clone()),
            generation: 0,
            offset: None,
        },
    );

    // xref streams are never encrypted
    write_stream_dict_object(ctx, s, obj_nr, 0, &mut sd, false)?;

    s.write_eol()?;
    s.write_str("startxref")?;
    s.write_eol()?;
    s.write_str(&format!("{}", xref_offset))?;
    s.write_eol()
}

fn log_write_stats(ctx: &Context) {
    info!(
        "wrote {} bytes, {} objects emitted",
        ctx.write.file_size,
        ctx.write.table.len()
    );
    if ctx.optimized {
        info!(
            "binary fonts: {} bytes ({} duplicate), binary images: {} bytes ({} duplicate)",
            ctx.read.binary_font_size,
            ctx.read.binary_font_dupl_size,
            ctx.read.binary_image_size,
            ctx.read.binary_image_dupl_size
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Configuration;
    use crate::optimize::optimize_xref_table;
    use crate::pdf::{PDFFilter, XRefTable, FLATE};
    use std::collections::BTreeSet;
    use test_log::test;

    const ROOT_NR: u32 = 1;
    const PAGES_NR: u32 = 2;

    struct DocBuilder {
        xref: XRefTable,
        page_refs: Vec<u32>,
    }

    impl DocBuilder {
        fn new(page_count: usize) -> Self {
            let mut xref = XRefTable::new();

            let mut catalog = Dict::new();
            catalog.insert("Type", Object::name("Catalog"));
            catalog.set_indirect_ref("Pages", PAGES_NR, 0);
            xref.insert_object(ROOT_NR, Object::Dict(catalog));
            xref.root = Some(IndirectRef::new(ROOT_NR, 0));

            let first_page = 100u32;
            let mut kids = Vec::new();
            let mut page_refs = Vec::new();
            for i in 0..page_count {
                let nr = first_page + i as u32;
                kids.push(Object::indirect(nr, 0));
                page_refs.push(nr);

                let mut page = Dict::new();
                page.insert("Type", Object::name("Page"));
                page.set_indirect_ref("Parent", PAGES_NR, 0);
                xref.insert_object(nr, Object::Dict(page));
            }

            let mut pages = Dict::new();
            pages.insert("Type", Object::name("Pages"));
            pages.insert("Count", Object::Integer(page_count as i64));
            pages.insert("Kids", Object::Array(kids));
            xref.insert_object(PAGES_NR, Object::Dict(pages));

            Self { xref, page_refs }
        }

        fn set_page_entry(&mut self, page: usize, key: &str, value: Object) {
            let nr = self.page_refs[page];
            let mut dict = match self.xref.find(nr).unwrap().object() {
                Some(Object::Dict(d)) => d.clone(),
                _ => panic!("page {} is not a dict", page),
            };
            dict.insert(key, value);
            self.xref.update_object(nr, Object::Dict(dict)).unwrap();
        }

        fn add_font(&mut self, nr: u32, base_font: &str) {
            let mut font = Dict::new();
            font.insert("Type", Object::name("Font"));
            font.insert("Subtype", Object::name("Type1"));
            font.insert("BaseFont", Object::name(base_font));
            self.xref.insert_object(nr, Object::Dict(font));
        }

        fn font_resources(pairs: &[(&str, u32)]) -> Object {
            let mut fonts = Dict::new();
            for (name, nr) in pairs {
                fonts.set_indirect_ref(*name, *nr, 0);
            }
            let mut res = Dict::new();
            res.insert("Font", Object::Dict(fonts));
            Object::Dict(res)
        }

        fn ctx(self, conf: Configuration) -> Context {
            Context::new(self.xref, conf)
        }
    }

    fn classical_conf() -> Configuration {
        Configuration {
            write_xref_stream: false,
            write_object_stream: false,
            ..Default::default()
        }
    }

    fn write_to_vec(ctx: &mut Context) -> Vec<u8> {
        let mut out = Vec::new();
        write_pdf(ctx, &mut out).unwrap();
        out
    }

    fn startxref_offset(out: &[u8]) -> usize {
        let text = String::from_utf8_lossy(out);
        let pos = text.rfind("startxref").expect("startxref present");
        let rest = &text[pos + "startxref".len()..];
        rest.split_whitespace()
            .next()
            .expect("offset after startxref")
            .parse()
            .expect("decimal offset")
    }

    #[test]
    fn test_header_byte_prefix() {
        let mut ctx = DocBuilder::new(1).ctx(classical_conf());
        let out = write_to_vec(&mut ctx);

        assert_eq!(&out[..10], b"%PDF-1.7\n%");
        assert!(out[10] >= 0x80 && out[11] >= 0x80 && out[12] >= 0x80 && out[13] >= 0x80);
        assert_eq!(out[14], b'\n');
        assert!(out.ends_with(b"%%EOF\n"));
    }

    #[test]
    fn test_written_offsets_point_at_obj_markers() {
        let mut ctx = DocBuilder::new(2).ctx(classical_conf());
        let out = write_to_vec(&mut ctx);

        assert!(!ctx.write.table.is_empty());
        for (&obj_nr, &offset) in &ctx.write.table {
            let marker = format!("{} 0 obj", obj_nr);
            assert_eq!(
                &out[offset as usize..offset as usize + marker.len()],
                marker.as_bytes(),
                "offset of obj #{} does not hit its marker",
                obj_nr
            );
        }
    }

    #[test]
    fn test_classical_xref_table_layout() {
        let mut ctx = DocBuilder::new(1).ctx(classical_conf());
        let out = write_to_vec(&mut ctx);
        let text = String::from_utf8_lossy(&out);

        let xref_offset = startxref_offset(&out);
        assert_eq!(&out[xref_offset..xref_offset + 5], b"xref\n");

        // objects 0-2 are dense, the page at 100 and the info dict at
        // 101 form a second subsection
        let after = &text[xref_offset + 5..];
        let header = after.lines().next().unwrap();
        assert_eq!(header, "0 3");
        assert!(text.contains("\n100 2\n"));

        // each entry line is exactly 20 bytes with a 2-byte EOL
        let entries_start = xref_offset + 5 + header.len() + 1;
        let first = &out[entries_start..entries_start + 20];
        assert_eq!(&first[17..], b"f\r\n");
        assert!(first.starts_with(b"0000000000 65535 f"));

        let second = &out[entries_start + 20..entries_start + 40];
        assert_eq!(&second[17..], b"n\r\n");

        assert!(text.contains("trailer\n"));
        assert!(text.contains("/Root 1 0 R"));
        assert!(text.contains(&format!("/Size {}", ctx.xref.size)));
    }

    #[test]
    fn test_info_dict_and_file_id_created() {
        let mut ctx = DocBuilder::new(1).ctx(classical_conf());
        let out = write_to_vec(&mut ctx);

        let info = ctx.xref.info.expect("info dict installed");
        assert!(ctx.write.has_write_offset(info.obj_nr));

        let id = ctx.xref.id.as_ref().expect("file ID installed");
        assert_eq!(id.len(), 2);
        assert_eq!(id[0], id[1]);
        match &id[0] {
            Object::HexLiteral(b) => assert_eq!(b.len(), 16),
            other => panic!("unexpected ID element: {:?}", other),
        }

        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("/Producer(pdfopt v"));
    }

    #[test]
    fn test_rewrite_keeps_first_id_element() {
        let mut ctx = DocBuilder::new(1).ctx(classical_conf());
        write_to_vec(&mut ctx);
        let first = ctx.xref.id.as_ref().unwrap()[0].clone();

        // a second write updates only the second element
        ctx.write = Default::default();
        write_to_vec(&mut ctx);
        let id = ctx.xref.id.as_ref().unwrap();
        assert_eq!(id[0], first);
        assert_ne!(id[0], id[1]);
    }

    #[test]
    fn test_dedup_frees_duplicate_and_keeps_shared_descriptor() {
        let mut b = DocBuilder::new(1);
        b.add_font(10, "Helvetica");
        b.add_font(15, "Helvetica");
        // both fonts share one descriptor
        let mut descriptor = Dict::new();
        descriptor.insert("Type", Object::name("FontDescriptor"));
        descriptor.insert("FontName", Object::name("Helvetica"));
        b.xref.insert_object(16, Object::Dict(descriptor));
        for font_nr in [10u32, 15] {
            let mut d = match b.xref.find(font_nr).unwrap().object() {
                Some(Object::Dict(d)) => d.clone(),
                _ => unreachable!(),
            };
            d.set_indirect_ref("FontDescriptor", 16, 0);
            b.xref.update_object(font_nr, Object::Dict(d)).unwrap();
        }
        b.set_page_entry(
            0,
            "Resources",
            DocBuilder::font_resources(&[("F1", 10), ("F2", 15)]),
        );

        let mut ctx = b.ctx(classical_conf());
        optimize_xref_table(&mut ctx).unwrap();
        // the shared descriptor lands in the duplicate closure
        assert!(ctx.optimize.duplicate_font_objs.contains(&16));

        write_to_vec(&mut ctx);

        // the duplicate font is freed, the canonical and the shared
        // descriptor survive with write offsets
        assert!(ctx.xref.find(15).unwrap().is_free());
        assert!(ctx.write.has_write_offset(10));
        assert!(ctx.write.has_write_offset(16));
        assert!(!ctx.xref.find(16).unwrap().is_free());
    }

    #[test]
    fn test_extract_page_nr_gate_suppresses_dedup_deletion() {
        let mut b = DocBuilder::new(1);
        b.add_font(10, "Helvetica");
        b.add_font(15, "Helvetica");
        b.set_page_entry(
            0,
            "Resources",
            DocBuilder::font_resources(&[("F1", 10), ("F2", 15)]),
        );

        let mut conf = classical_conf();
        conf.extract_page_nr = 1;
        let mut ctx = b.ctx(conf);
        optimize_xref_table(&mut ctx).unwrap();
        write_to_vec(&mut ctx);

        // the duplicate stays in use when extracting a single page
        assert!(!ctx.xref.find(15).unwrap().is_free());
    }

    #[test]
    fn test_leftover_envelopes_are_freed() {
        let mut b = DocBuilder::new(1);
        // an unreferenced object-stream envelope from the source file
        let mut sd = StreamDict::new(Dict::new());
        sd.raw = Some(vec![0u8; 3]);
        b.xref.insert_object(60, Object::Stream(sd));

        let mut ctx = b.ctx(classical_conf());
        ctx.read.object_stream_objs.insert(60);
        write_to_vec(&mut ctx);

        assert!(ctx.xref.find(60).unwrap().is_free());
    }

    #[test]
    fn test_linearization_hint_table_freed() {
        let mut b = DocBuilder::new(1);
        let mut sd = StreamDict::new(Dict::new());
        sd.raw = Some(vec![0u8; 3]);
        b.xref.insert(
            61,
            XRefEntry::InUse {
                object: Object::Stream(sd),
                generation: 0,
                offset: Some(5000),
            },
        );
        b.xref.offset_primary_hint_table = Some(5000);

        let mut ctx = b.ctx(classical_conf());
        ctx.read.linearized = true;
        write_to_vec(&mut ctx);

        assert!(ctx.xref.linearization_objs.contains(&61));
        assert!(ctx.xref.find(61).unwrap().is_free());
    }

    #[test]
    fn test_page_extraction() {
        let b = DocBuilder::new(10);
        let kept_pages = [b.page_refs[2], b.page_refs[6]];
        let dropped_page = b.page_refs[0];

        let mut conf = classical_conf();
        conf.extract_pages = Some(BTreeSet::from([3, 7]));
        let mut ctx = b.ctx(conf);
        write_to_vec(&mut ctx);

        let pages = ctx
            .xref
            .dereference_dict(&Object::indirect(PAGES_NR, 0))
            .unwrap()
            .unwrap();
        assert_eq!(pages.get_integer("Count"), Some(2));
        assert_eq!(pages.get_array("Kids").unwrap().len(), 2);

        for nr in kept_pages {
            assert!(ctx.write.has_write_offset(nr));
        }
        assert!(!ctx.write.has_write_offset(dropped_page));

        // the reduced feature set strips complex catalog entries
        let catalog = ctx
            .xref
            .dereference_dict(&Object::indirect(ROOT_NR, 0))
            .unwrap()
            .unwrap();
        assert!(catalog.get("Outlines").is_none());
    }

    #[test]
    fn test_object_stream_packing() {
        let conf = Configuration {
            write_xref_stream: true,
            write_object_stream: true,
            ..Default::default()
        };
        let mut ctx = DocBuilder::new(2).ctx(conf);
        let out = write_to_vec(&mut ctx);

        // page tree objects were packed
        let pages_entry = ctx.xref.find(PAGES_NR).unwrap();
        assert!(matches!(pages_entry, XRefEntry::Compressed { .. }));
        let page_entry = ctx.xref.find(100).unwrap();
        assert!(matches!(page_entry, XRefEntry::Compressed { .. }));

        // the envelope was written inline
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("/Type/ObjStm"));
        assert!(text.contains("/First "));
    }

    #[test]
    fn test_xref_stream_index_and_widths() {
        // dense objects 1..=4, a gap at 5 and 6, then object 7
        let mut xref = XRefTable::new();

        let mut catalog = Dict::new();
        catalog.insert("Type", Object::name("Catalog"));
        catalog.set_indirect_ref("Pages", 2, 0);
        xref.insert_object(1, Object::Dict(catalog));
        xref.root = Some(IndirectRef::new(1, 0));

        let mut pages = Dict::new();
        pages.insert("Type", Object::name("Pages"));
        pages.insert("Count", Object::Integer(1));
        pages.insert("Kids", Object::Array(vec![Object::indirect(3, 0)]));
        xref.insert_object(2, Object::Dict(pages));

        let mut page = Dict::new();
        page.insert("Type", Object::name("Page"));
        page.set_indirect_ref("Parent", 2, 0);
        page.set_indirect_ref("Contents", 4, 0);
        xref.insert_object(3, Object::Dict(page));

        let mut content_dict = Dict::new();
        content_dict.insert("Filter", Object::name(FLATE));
        let mut content = StreamDict::new(content_dict);
        content.filter_pipeline = vec![PDFFilter::named(FLATE)];
        content.content = Some(b"BT ET".to_vec());
        xref.insert_object(4, Object::Stream(content));

        let mut info = Dict::new();
        info.insert("Title", Object::string_lit("gap"));
        xref.insert(
            7,
            XRefEntry::InUse {
                object: Object::Dict(info),
                generation: 0,
                offset: None,
            },
        );
        xref.info = Some(IndirectRef::new(7, 0));

        let conf = Configuration {
            write_xref_stream: true,
            write_object_stream: false,
            ..Default::default()
        };
        let mut ctx = Context::new(xref, conf);
        let out = write_to_vec(&mut ctx);
        let text = String::from_utf8_lossy(&out);

        // the envelope is appended past the gap at the next free number
        let xref_offset = startxref_offset(&out);
        assert!(text[xref_offset..].starts_with("8 0 obj"));

        // runs: [0..=4] and [7]; the envelope has no write offset when
        // the entry data is built and is not indexed
        assert!(text.contains("/Index[0 5 7 1]"));
        assert!(text.contains("/W[1 2 2]"));
        assert!(text.contains("/Type/XRef"));
        assert!(text.contains(&format!("/Size {}", ctx.xref.size)));
    }

    #[test]
    fn test_encryption_install() {
        let mut b = DocBuilder::new(1);
        b.set_page_entry(0, "MediaBox", Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(612),
            Object::Integer(792),
        ]));

        let conf = Configuration {
            mode: Mode::Encrypt,
            encrypt_using_aes: false,
            encrypt_using_128bit_key: true,
            user_pw: "user".to_string(),
            owner_pw: "owner".to_string(),
            ..classical_conf()
        };
        let mut ctx = b.ctx(conf);
        let out = write_to_vec(&mut ctx);
        let text = String::from_utf8_lossy(&out);

        let encrypt_ref = ctx.xref.encrypt.expect("encrypt dict installed");
        assert!(ctx.write.has_write_offset(encrypt_ref.obj_nr));
        assert!(text.contains(&format!("/Encrypt {} 0 R", encrypt_ref.obj_nr)));

        let enc = ctx.encryption.as_ref().unwrap();
        assert_eq!(enc.r, 3);
        assert_eq!(enc.o.len(), 32);
        assert_eq!(enc.u.len(), 32);

        // O and U are emitted as 32-byte hex literals
        let offset = ctx.write.write_offset(encrypt_ref.obj_nr).unwrap() as usize;
        let dict_text = &text[offset..text[offset..].find("endobj").unwrap() + offset];
        assert!(dict_text.contains("/O<"));
        assert!(dict_text.contains("/U<"));
        assert!(dict_text.contains("/R 3"));
        assert!(dict_text.contains("/Filter/Standard"));
    }

    #[test]
    fn test_encryption_forces_classical_xref() {
        let conf = Configuration {
            mode: Mode::Encrypt,
            write_xref_stream: true,
            write_object_stream: true,
            user_pw: "pw".to_string(),
            ..Default::default()
        };
        let mut ctx = DocBuilder::new(1).ctx(conf);
        // the source used a classical xref table
        ctx.read.using_xref_streams = false;

        let out = write_to_vec(&mut ctx);
        let text = String::from_utf8_lossy(&out);

        assert!(!ctx.conf.write_xref_stream);
        assert!(!ctx.conf.write_object_stream);
        assert!(text.contains("trailer\n"));
        assert!(!text.contains("/Type/XRef"));
    }

    #[test]
    fn test_password_change_requires_encrypted_input() {
        let conf = Configuration {
            mode: Mode::ChangePasswords,
            user_pw_new: Some("fresh".to_string()),
            ..classical_conf()
        };
        let mut ctx = DocBuilder::new(1).ctx(conf);

        let mut out = Vec::new();
        assert!(matches!(
            write_pdf(&mut ctx, &mut out),
            Err(PDFOptError::EncryptionMisuse(_))
        ));
    }

    #[test]
    fn test_stats_record_written_root_entries() {
        let mut b = DocBuilder::new(1);
        let mut outlines = Dict::new();
        outlines.insert("Type", Object::name("Outlines"));
        outlines.insert("Count", Object::Integer(0));
        b.xref.insert_object(70, Object::Dict(outlines));

        let mut catalog = match b.xref.find(ROOT_NR).unwrap().object() {
            Some(Object::Dict(d)) => d.clone(),
            _ => unreachable!(),
        };
        catalog.set_indirect_ref("Outlines", 70, 0);
        b.xref.update_object(ROOT_NR, Object::Dict(catalog)).unwrap();

        let mut ctx = b.ctx(classical_conf());
        write_to_vec(&mut ctx);

        assert!(ctx.write.stats.has_root_attr(root_attrs::OUTLINES));
        assert!(!ctx.write.stats.has_root_attr(root_attrs::ACRO_FORM));
        assert!(ctx.write.has_write_offset(70));
    }

    #[test]
    fn test_end_to_end_optimize_then_write() {
        let mut b = DocBuilder::new(2);
        b.add_font(10, "Helvetica");
        b.add_font(15, "Helvetica");
        b.set_page_entry(0, "Resources", DocBuilder::font_resources(&[("F1", 10)]));
        b.set_page_entry(1, "Resources", DocBuilder::font_resources(&[("F2", 15)]));

        let mut ctx = b.ctx(classical_conf());
        optimize_xref_table(&mut ctx).unwrap();
        let out = write_to_vec(&mut ctx);
        let text = String::from_utf8_lossy(&out);

        // one font object emitted, the duplicate freed and listed free
        assert!(ctx.write.has_write_offset(10));
        assert!(!ctx.write.has_write_offset(15));
        assert!(ctx.xref.find(15).unwrap().is_free());
        assert_eq!(text.matches("/BaseFont/Helvetica").count(), 1);

        // both pages reference the canonical font
        for page_nr in [100u32, 101] {
            let page = ctx
                .xref
                .dereference_dict(&Object::indirect(page_nr, 0))
                .unwrap()
                .unwrap();
            let res = page.get("Resources").and_then(Object::as_dict).unwrap();
            let fonts = res.get("Font").and_then(Object::as_dict).unwrap();
            for (_, v) in fonts.iter() {
                assert_eq!(v.as_indirect_ref().unwrap().obj_nr, 10);
            }
        }
    }
}
