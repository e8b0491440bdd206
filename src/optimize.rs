//! Font and image deduplication over the page tree.
//!
//! Structurally identical fonts and images stored as separate objects are
//! collapsed onto a single canonical object; the duplicates and their
//! exclusively owned subgraphs are marked for freeing. The marking
//! over-approximates shared subresources; the serializer re-checks before
//! actually freeing (mark-then-verify instead of reference counting).

use std::collections::HashSet;

use log::{debug, info, trace};

use crate::context::{Context, FontObject, ImageObject};
use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{Dict, IndirectRef, Object, StreamDict, XRefTable};

// Equality probes and descriptor walks resolve refs through the table;
// the guard bounds corrupt, cyclic graphs.
const MAX_EQUALITY_DEPTH: usize = 30;

/// Optimize an xref table by locating and freeing redundant embedded
/// fonts and images.
pub fn optimize_xref_table(ctx: &mut Context) -> PDFOptResult<()> {
    info!("optimizing fonts & images");

    optimize_fonts_and_images(ctx)?;
    calc_binary_sizes(ctx)?;

    ctx.optimized = true;
    Ok(())
}

// Iterate over all pages and optimize resources, then mark the duplicate
// object closures.
fn optimize_fonts_and_images(ctx: &mut Context) -> PDFOptResult<()> {
    let pages_ref = ctx.pages_ref()?;

    let page_tree_root = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(pages_ref))?
        .ok_or_else(|| PDFOptError::corrupt("page tree root dereferences to null"))?;

    let page_count = page_tree_root
        .get_integer("Count")
        .ok_or_else(|| PDFOptError::missing("Count"))? as usize;

    if ctx.page_count > 0 && ctx.page_count != page_count {
        return Err(PDFOptError::invariant(format!(
            "page root dict page count discrepancy: {} vs {}",
            ctx.page_count, page_count
        )));
    }
    if ctx.page_count == 0 {
        ctx.page_count = page_count;
    }

    ctx.optimize.page_fonts = vec![HashSet::new(); ctx.page_count];
    ctx.optimize.page_images = vec![HashSet::new(); ctx.page_count];

    parse_pages_dict(ctx, pages_ref, 0)?;

    calc_redundant_objects(ctx)
}

// Walk the page tree depth-first, left to right.
fn parse_pages_dict(ctx: &mut Context, pages_ref: IndirectRef, mut page_number: usize) -> PDFOptResult<usize> {
    let pages_dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(pages_ref))?
        .ok_or_else(|| PDFOptError::corrupt("pages node dereferences to null"))?;

    let count = pages_dict
        .get_integer("Count")
        .ok_or_else(|| PDFOptError::missing("Count"))?;
    trace!("pages node obj #{} holds {} pages", pages_ref.obj_nr, count);

    let kids = ctx
        .xref
        .dereference_array(pages_dict.get("Kids").unwrap_or(&Object::Null))?
        .ok_or_else(|| PDFOptError::corrupt(format!("obj #{}: malformed Kids array", pages_ref.obj_nr)))?;

    for kid in &kids {
        let ind_ref = kid.as_indirect_ref().ok_or_else(|| {
            PDFOptError::corrupt(format!("obj #{}: page node kid is not an indirect ref", pages_ref.obj_nr))
        })?;

        let node_dict = ctx
            .xref
            .dereference_dict(kid)?
            .ok_or_else(|| PDFOptError::corrupt("cannot locate page dict or pages dict"))?;

        match node_dict.type_name() {
            Some("Pages") => {
                page_number = parse_pages_dict(ctx, ind_ref, page_number)?;
            }
            Some("Page") => {
                if page_number >= ctx.page_count {
                    return Err(PDFOptError::invariant(format!(
                        "page tree holds more than the declared {} pages",
                        ctx.page_count
                    )));
                }
                identify_page_content(ctx, ind_ref)?;
                parse_resources_dict(ctx, ind_ref.obj_nr, page_number)?;
                page_number += 1;
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

    Ok(page_number)
}

// Tag the content stream(s) of a page dict. Contents is either a single
// indirect ref to a stream or an array of such refs.
fn identify_page_content(ctx: &mut Context, page_ref: IndirectRef) -> PDFOptResult<()> {
    let page_dict = ctx
        .xref
        .dereference_dict(&Object::IndirectRef(page_ref))?
        .ok_or_else(|| PDFOptError::corrupt("page dict dereferences to null"))?;

    let contents = match page_dict.get("Contents") {
        Some(c) => c.clone(),
        None => return Ok(()),
    };

    let content_arr = match &contents {
        Object::IndirectRef(r) => {
            if mark_page_content(ctx, *r)? {
                return Ok(());
            }
            match ctx.xref.dereference(&contents)? {
                Object::Array(a) => a,
                _ => {
                    return Err(PDFOptError::corrupt(format!(
                        "obj #{}: page content entry neither stream dict nor array",
                        page_ref.obj_nr
                    )))
                }
            }
        }
        Object::Array(a) => a.clone(),
        _ => {
            return Err(PDFOptError::corrupt(format!(
                "obj #{}: corrupt page content entry",
                page_ref.obj_nr
            )))
        }
    };

    for c in &content_arr {
        let r = c.as_indirect_ref().ok_or_else(|| {
            PDFOptError::corrupt(format!(
                "obj #{}: corrupt page content array entry",
                page_ref.obj_nr
            ))
        })?;
        if !mark_page_content(ctx, r)? {
            return Err(PDFOptError::corrupt(format!(
                "obj #{}: page content entry is no stream dict",
                page_ref.obj_nr
            )));
        }
    }

    Ok(())
}

// Set is_page_content on the stream behind a ref. Returns false if the
// referenced object is no stream.
fn mark_page_content(ctx: &mut Context, r: IndirectRef) -> PDFOptResult<bool> {
    let entry = ctx
        .xref
        .find_mut(r.obj_nr)
        .ok_or_else(|| PDFOptError::corrupt(format!("illegal indirect ref for Contents: #{}", r.obj_nr)))?;

    match entry {
        crate::pdf::XRefEntry::InUse {
            object: Object::Stream(sd),
            ..
        }
        | crate::pdf::XRefEntry::Compressed {
            object: Object::Stream(sd),
            ..
        } => {
            sd.is_page_content = true;
            trace!("tagged content stream obj #{}", r.obj_nr);
            Ok(true)
        }
        _ => Ok(false),
    }
}

// Process the resources dict of a page or form owner object. Only a
// directly present resources dict is handled here; inherited dicts are
// processed at their defining ancestor.
fn parse_resources_dict(ctx: &mut Context, owner_obj_nr: u32, page_number: usize) -> PDFOptResult<()> {
    trace!("resources of owner obj #{} page {}", owner_obj_nr, page_number + 1);

    let owner_dict = owner_dict(ctx, owner_obj_nr)?;
    let resources = match owner_dict.get("Resources") {
        Some(r) => r.clone(),
        None => return Ok(()),
    };

    match resources {
        Object::Dict(d) => {
            let mut d = d;
            if optimize_resources(ctx, &mut d, page_number, owner_obj_nr)? {
                let mut owner = owner_dict;
                owner.insert("Resources", Object::Dict(d));
                write_back_owner_dict(ctx, owner_obj_nr, owner)?;
            }
        }
        Object::IndirectRef(r) => {
            let mut d = ctx
                .xref
                .dereference_dict(&resources)?
                .ok_or_else(|| {
                    PDFOptError::corrupt(format!(
                        "resources dict is null for owner obj #{}",
                        owner_obj_nr
                    ))
                })?;
            if optimize_resources(ctx, &mut d, page_number, owner_obj_nr)? {
                ctx.xref.update_object(r.obj_nr, Object::Dict(d))?;
            }
        }
        Object::Null => {}
        other => {
            return Err(PDFOptError::TypeMismatch {
                expected: "Dict",
                found: other.variant_name().to_string(),
            })
        }
    }

    Ok(())
}

// The dictionary of a page dict or a form stream dict.
fn owner_dict(ctx: &Context, owner_obj_nr: u32) -> PDFOptResult<Dict> {
    let entry = ctx
        .xref
        .find(owner_obj_nr)
        .ok_or(PDFOptError::ObjectNotFound(owner_obj_nr))?;
    match entry.object() {
        Some(Object::Dict(d)) => Ok(d.clone()),
        Some(Object::Stream(sd)) => Ok(sd.dict.clone()),
        _ => Err(PDFOptError::corrupt(format!(
            "resource owner obj #{} is neither dict nor stream",
            owner_obj_nr
        ))),
    }
}

fn write_back_owner_dict(ctx: &mut Context, owner_obj_nr: u32, dict: Dict) -> PDFOptResult<()> {
    let entry = ctx
        .xref
        .find(owner_obj_nr)
        .ok_or(PDFOptError::ObjectNotFound(owner_obj_nr))?;
    let updated = match entry.object() {
        Some(Object::Stream(sd)) => {
            let mut sd = sd.clone();
            sd.dict = dict;
            Object::Stream(sd)
        }
        _ => Object::Dict(dict),
    };
    ctx.xref.update_object(owner_obj_nr, updated)
}

// Optimize one resources dict: dedup Font and XObject sub-dicts. Returns
// true if the resources dict itself was rewritten (direct sub-dict case).
fn optimize_resources(
    ctx: &mut Context,
    resources: &mut Dict,
    page_number: usize,
    owner_obj_nr: u32,
) -> PDFOptResult<bool> {
    let mut modified = false;

    if let Some(font_res) = resources.get("Font").cloned() {
        match font_res {
            Object::Dict(d) => {
                let mut d = d;
                if optimize_font_resources_dict(ctx, &mut d, page_number)? {
                    resources.insert("Font", Object::Dict(d));
                    modified = true;
                }
            }
            Object::IndirectRef(r) => {
                let mut d = ctx.xref.dereference_dict(&font_res)?.ok_or_else(|| {
                    PDFOptError::corrupt(format!(
                        "font resource dict is null for page {} owner obj #{}",
                        page_number + 1,
                        owner_obj_nr
                    ))
                })?;
                if optimize_font_resources_dict(ctx, &mut d, page_number)? {
                    ctx.xref.update_object(r.obj_nr, Object::Dict(d))?;
                }
            }
            other => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Dict",
                    found: other.variant_name().to_string(),
                })
            }
        }
    }

    // An optional ExtGState resource dict may also carry binary content
    // in SMask or HT entries.

    if let Some(xobj_res) = resources.get("XObject").cloned() {
        match xobj_res {
            Object::Dict(d) => {
                let mut d = d;
                if optimize_xobject_resources_dict(ctx, &mut d, page_number)? {
                    resources.insert("XObject", Object::Dict(d));
                    modified = true;
                }
            }
            Object::IndirectRef(r) => {
                let mut d = ctx.xref.dereference_dict(&xobj_res)?.ok_or_else(|| {
                    PDFOptError::corrupt(format!(
                        "xobject resource dict is null for page {} owner obj #{}",
                        page_number + 1,
                        owner_obj_nr
                    ))
                })?;
                if optimize_xobject_resources_dict(ctx, &mut d, page_number)? {
                    ctx.xref.update_object(r.obj_nr, Object::Dict(d))?;
                }
            }
            other => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Dict",
                    found: other.variant_name().to_string(),
                })
            }
        }
    }

    Ok(modified)
}

// The dedup key of a font dict: Type3 fonts use Name, everything else
// prefers BaseFont over Name.
fn font_name(ctx: &Context, font_dict: &Dict, obj_nr: u32) -> PDFOptResult<String> {
    let name_obj = if font_dict.subtype() != Some("Type3") {
        match font_dict.get("BaseFont").or_else(|| font_dict.get("Name")) {
            Some(o) => o.clone(),
            None => return Err(PDFOptError::missing("BaseFont and Name")),
        }
    } else {
        // Type3 fonts only carry Name in V1.0, else use a generic name.
        match font_dict.get("Name") {
            Some(o) => o.clone(),
            None => return Ok(format!("Type3_{}", obj_nr)),
        }
    };

    match ctx.xref.dereference(&name_obj)? {
        Object::Name(n) => Ok(n),
        _ => Err(PDFOptError::corrupt("corrupt font dict entry BaseFont")),
    }
}

// Probe registered fonts of the same base name for a structural match.
// On a match the duplicate is recorded and the canonical number returned.
fn handle_duplicate_font_object(
    ctx: &mut Context,
    font_dict: &Dict,
    font_name: &str,
    resource_name: &str,
    obj_nr: u32,
    page_number: usize,
) -> PDFOptResult<Option<u32>> {
    let candidates = match ctx.optimize.fonts.get(font_name) {
        Some(nrs) => nrs.clone(),
        None => return Ok(None),
    };

    for candidate in candidates {
        trace!("comparing font obj #{} with #{}", obj_nr, candidate);
        let candidate_dict = &ctx.optimize.font_objects[&candidate].font_dict;

        if equal_font_dicts(candidate_dict, font_dict, &ctx.xref)? {
            debug!(
                "redundant font obj #{}: base font {} already registered with obj #{}",
                obj_nr, font_name, candidate
            );

            ctx.optimize.page_fonts[page_number].insert(candidate);
            ctx.optimize
                .font_objects
                .get_mut(&candidate)
                .expect("probed font object registered")
                .add_resource_name(resource_name);
            ctx.optimize.duplicate_fonts.insert(obj_nr, font_dict.clone());

            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

// Get rid of redundant fonts for one font resources dict. Returns true
// if any resource entry was rewritten to a canonical ref.
fn optimize_font_resources_dict(
    ctx: &mut Context,
    font_resources: &mut Dict,
    page_number: usize,
) -> PDFOptResult<bool> {
    let mut modified = false;
    let entries: Vec<(String, Object)> = font_resources
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (resource_name, value) in entries {
        let ind_ref = value.as_indirect_ref().ok_or_else(|| {
            PDFOptError::corrupt(format!("missing indirect object ref for Font: {}", resource_name))
        })?;
        let obj_nr = ind_ref.obj_nr;

        if ctx.optimize.font_objects.contains_key(&obj_nr) {
            ctx.optimize.page_fonts[page_number].insert(obj_nr);
            continue;
        }

        let font_dict = match ctx.xref.dereference(&value)? {
            Object::Dict(d) => d,
            other => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Dict",
                    found: other.variant_name().to_string(),
                })
            }
        };

        match font_dict.type_name() {
            Some("Font") => {}
            Some(other) => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Font",
                    found: other.to_string(),
                })
            }
            None => return Err(PDFOptError::missing("Type")),
        }

        let mut base_name = font_name(ctx, &font_dict, obj_nr)?;

        // Isolate a subset prefix of the form ABCDEF+Real-Name.
        let mut prefix = String::new();
        if let Some(i) = base_name.find('+') {
            if i > 0 {
                prefix = base_name[..i].to_string();
                base_name = base_name[i + 1..].to_string();
            }
        }

        let unique = handle_duplicate_font_object(
            ctx,
            &font_dict,
            &base_name,
            &resource_name,
            obj_nr,
            page_number,
        )?;

        match unique {
            Some(canonical) => {
                font_resources.set_indirect_ref(resource_name, canonical, 0);
                modified = true;
            }
            None => {
                debug!("adding new font {} obj #{}", base_name, obj_nr);
                ctx.optimize
                    .fonts
                    .entry(base_name.clone())
                    .or_default()
                    .push(obj_nr);
                ctx.optimize.font_objects.insert(
                    obj_nr,
                    FontObject {
                        resource_names: vec![resource_name],
                        prefix,
                        font_name: base_name,
                        font_dict,
                    },
                );
                ctx.optimize.page_fonts[page_number].insert(obj_nr);
            }
        }
    }

    Ok(modified)
}

// Probe all registered images for a structural match; images carry no
// natural key.
fn handle_duplicate_image_object(
    ctx: &mut Context,
    image: &StreamDict,
    resource_name: &str,
    obj_nr: u32,
    page_number: usize,
) -> PDFOptResult<Option<u32>> {
    let candidates: Vec<u32> = ctx.optimize.image_objects.keys().copied().collect();

    for candidate in candidates {
        trace!("comparing image obj #{} with #{}", obj_nr, candidate);
        let candidate_dict = &ctx.optimize.image_objects[&candidate].image_dict;

        if equal_stream_dicts(candidate_dict, image, &ctx.xref)? {
            debug!(
                "redundant image obj #{}: already registered with obj #{}",
                obj_nr, candidate
            );

            ctx.optimize.page_images[page_number].insert(candidate);
            ctx.optimize
                .image_objects
                .get_mut(&candidate)
                .expect("probed image object registered")
                .add_resource_name(resource_name);
            ctx.optimize.duplicate_images.insert(obj_nr, image.clone());

            return Ok(Some(candidate));
        }
    }

    Ok(None)
}

// Get rid of redundant XObjects, e.g. embedded images; recurse into form
// XObjects which carry their own resource scope.
fn optimize_xobject_resources_dict(
    ctx: &mut Context,
    xobject_resources: &mut Dict,
    page_number: usize,
) -> PDFOptResult<bool> {
    let mut modified = false;
    let entries: Vec<(String, Object)> = xobject_resources
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (resource_name, value) in entries {
        let ind_ref = value.as_indirect_ref().ok_or_else(|| {
            PDFOptError::corrupt(format!(
                "missing indirect object ref for XObject resource: {}",
                resource_name
            ))
        })?;
        let obj_nr = ind_ref.obj_nr;

        let stream_dict = match ctx.xref.dereference(&value)? {
            Object::Stream(sd) => sd,
            other => {
                return Err(PDFOptError::TypeMismatch {
                    expected: "Stream",
                    found: other.variant_name().to_string(),
                })
            }
        };

        match stream_dict.dict.subtype() {
            Some("Image") => {
                if ctx.optimize.image_objects.contains_key(&obj_nr) {
                    ctx.optimize.page_images[page_number].insert(obj_nr);
                    continue;
                }

                let unique = handle_duplicate_image_object(
                    ctx,
                    &stream_dict,
                    &resource_name,
                    obj_nr,
                    page_number,
                )?;

                match unique {
                    Some(canonical) => {
                        xobject_resources.set_indirect_ref(resource_name, canonical, 0);
                        modified = true;
                    }
                    None => {
                        debug!("adding new image obj #{}", obj_nr);
                        ctx.optimize.image_objects.insert(
                            obj_nr,
                            ImageObject {
                                resource_names: vec![resource_name],
                                image_dict: stream_dict,
                            },
                        );
                        ctx.optimize.page_images[page_number].insert(obj_nr);
                    }
                }
            }
            Some("Form") => {
                trace!("recursing into form dict obj #{}", obj_nr);
                parse_resources_dict(ctx, obj_nr, page_number)?;
            }
            Some(other) => {
                debug!("skipping XObject subtype {} at obj #{}", other, obj_nr);
            }
            None => return Err(PDFOptError::missing("Subtype")),
        }
    }

    Ok(modified)
}

// Seed each duplicate and mark its whole object graph as potentially
// redundant.
fn calc_redundant_objects(ctx: &mut Context) -> PDFOptResult<()> {
    debug!(
        "marking closures of {} duplicate fonts, {} duplicate images",
        ctx.optimize.duplicate_fonts.len(),
        ctx.optimize.duplicate_images.len()
    );

    let font_dups: Vec<(u32, Dict)> = ctx
        .optimize
        .duplicate_fonts
        .iter()
        .map(|(nr, d)| (*nr, d.clone()))
        .collect();
    {
        let xref = &ctx.xref;
        let dupl_objs = &mut ctx.optimize.duplicate_font_objs;
        for (obj_nr, dict) in font_dups {
            dupl_objs.insert(obj_nr);
            traverse_object_graph_and_mark(xref, &Object::Dict(dict), dupl_objs)?;
        }
    }

    let image_dups: Vec<(u32, StreamDict)> = ctx
        .optimize
        .duplicate_images
        .iter()
        .map(|(nr, sd)| (*nr, sd.clone()))
        .collect();
    {
        let xref = &ctx.xref;
        let dupl_objs = &mut ctx.optimize.duplicate_image_objs;
        for (obj_nr, sd) in image_dups {
            dupl_objs.insert(obj_nr);
            traverse_object_graph_and_mark(xref, &Object::Stream(sd), dupl_objs)?;
        }
    }

    Ok(())
}

// Mark every object number reachable from obj. Visits dict values, stream
// dict values and array elements.
fn traverse_object_graph_and_mark(
    xref: &XRefTable,
    obj: &Object,
    dupl_objs: &mut HashSet<u32>,
) -> PDFOptResult<()> {
    match obj {
        Object::Dict(d) => {
            for (_, value) in d.iter() {
                traverse_value(xref, value, dupl_objs)?;
            }
        }
        Object::Stream(sd) => {
            for (_, value) in sd.dict.iter() {
                traverse_value(xref, value, dupl_objs)?;
            }
        }
        Object::Array(a) => {
            for value in a {
                traverse_value(xref, value, dupl_objs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn traverse_value(xref: &XRefTable, value: &Object, dupl_objs: &mut HashSet<u32>) -> PDFOptResult<()> {
    if let Object::IndirectRef(r) = value {
        // already-marked objects are not descended into again
        if dupl_objs.insert(r.obj_nr) {
            let o = xref.dereference(value)?;
            traverse_object_graph_and_mark(xref, &o, dupl_objs)?;
        }
        return Ok(());
    }
    traverse_object_graph_and_mark(xref, value, dupl_objs)
}

/// The font file reference of a font dict's descriptor, if the font is
/// embedded.
pub fn font_file_ref(xref: &XRefTable, font_dict: &Dict) -> PDFOptResult<Option<IndirectRef>> {
    let descriptor = match font_descriptor(xref, font_dict)? {
        Some(d) => d,
        None => return Ok(None),
    };
    Ok(descriptor
        .get_indirect_ref("FontFile")
        .or_else(|| descriptor.get_indirect_ref("FontFile2"))
        .or_else(|| descriptor.get_indirect_ref("FontFile3")))
}

// The font descriptor of a font dict, following the DescendantFonts hop
// of Type0 fonts.
fn font_descriptor(xref: &XRefTable, font_dict: &Dict) -> PDFOptResult<Option<Dict>> {
    if let Some(obj) = font_dict.get("FontDescriptor") {
        let dict = xref
            .dereference_dict(obj)?
            .ok_or_else(|| PDFOptError::corrupt("FontDescriptor is null"))?;
        if let Some(t) = dict.type_name() {
            if t != "FontDescriptor" {
                return Err(PDFOptError::TypeMismatch {
                    expected: "FontDescriptor",
                    found: t.to_string(),
                });
            }
        }
        return Ok(Some(dict));
    }

    // Type0 fonts hold the descriptor in their single descendant font.
    let obj = match font_dict.get("DescendantFonts") {
        Some(o) => o,
        None => return Ok(None),
    };

    let arr = xref
        .dereference_array(obj)?
        .ok_or_else(|| PDFOptError::corrupt("DescendantFonts dereferences to null"))?;
    if arr.len() != 1 {
        return Err(PDFOptError::corrupt(format!(
            "DescendantFonts array length {} instead of 1",
            arr.len()
        )));
    }

    let descendant = xref
        .dereference_dict(&arr[0])?
        .ok_or_else(|| PDFOptError::corrupt("descendant font dict is null"))?;
    if descendant.type_name() != Some("Font") {
        return Err(PDFOptError::TypeMismatch {
            expected: "Font",
            found: descendant.type_name().unwrap_or("missing").to_string(),
        });
    }

    let obj = match descendant.get("FontDescriptor") {
        Some(o) => o,
        None => {
            trace!("descendant font not embedded");
            return Ok(None);
        }
    };
    let dict = xref
        .dereference_dict(obj)?
        .ok_or_else(|| PDFOptError::corrupt("FontDescriptor is null"))?;
    Ok(Some(dict))
}

// Record byte totals of embedded fonts and images for the write stats.
fn calc_binary_sizes(ctx: &mut Context) -> PDFOptResult<()> {
    let mut font_file_refs: HashSet<IndirectRef> = HashSet::new();
    for font_object in ctx.optimize.font_objects.values() {
        if let Some(r) = font_file_ref(&ctx.xref, &font_object.font_dict)? {
            font_file_refs.insert(r);
        }
    }
    for r in &font_file_refs {
        ctx.read.binary_font_size += font_file_length(&ctx.xref, *r)?;
    }

    let mut dupl_refs: HashSet<IndirectRef> = HashSet::new();
    for font_dict in ctx.optimize.duplicate_fonts.values() {
        if let Some(r) = font_file_ref(&ctx.xref, font_dict)? {
            dupl_refs.insert(r);
        }
    }
    for r in &dupl_refs {
        ctx.read.binary_font_dupl_size += font_file_length(&ctx.xref, *r)?;
    }

    for image_object in ctx.optimize.image_objects.values() {
        ctx.read.binary_image_size += stream_byte_len(&image_object.image_dict);
    }
    for image_dict in ctx.optimize.duplicate_images.values() {
        ctx.read.binary_image_dupl_size += stream_byte_len(image_dict);
    }

    Ok(())
}

fn font_file_length(xref: &XRefTable, r: IndirectRef) -> PDFOptResult<u64> {
    let sd = xref
        .dereference_stream_dict(&Object::IndirectRef(r))?
        .ok_or_else(|| {
            PDFOptError::corrupt(format!("font file stream is null for obj #{}", r.obj_nr))
        })?;
    match sd.stream_length {
        Some(len) => Ok(len),
        None => Err(PDFOptError::corrupt(format!(
            "font file stream length is missing for obj #{}",
            r.obj_nr
        ))),
    }
}

fn stream_byte_len(sd: &StreamDict) -> u64 {
    sd.stream_length
        .or_else(|| sd.raw.as_ref().map(|r| r.len() as u64))
        .unwrap_or(0)
}

/// Deep structural equality of two font dicts, resolving indirect
/// references through the xref table.
pub fn equal_font_dicts(a: &Dict, b: &Dict, xref: &XRefTable) -> PDFOptResult<bool> {
    equal_dicts(a, b, xref, 0)
}

/// Deep structural equality of two stream dicts: equal dictionaries and
/// equal raw payloads.
pub fn equal_stream_dicts(a: &StreamDict, b: &StreamDict, xref: &XRefTable) -> PDFOptResult<bool> {
    if a.raw != b.raw {
        return Ok(false);
    }
    equal_dicts(&a.dict, &b.dict, xref, 0)
}

/// Deep structural equality of two objects.
pub fn equal_objects(a: &Object, b: &Object, xref: &XRefTable) -> PDFOptResult<bool> {
    eq_objects(a, b, xref, 0)
}

fn eq_objects(a: &Object, b: &Object, xref: &XRefTable, depth: usize) -> PDFOptResult<bool> {
    if depth > MAX_EQUALITY_DEPTH {
        return Err(PDFOptError::corrupt("object graph too deep for equality probe"));
    }

    // identical refs are equal without resolution
    if let (Object::IndirectRef(ra), Object::IndirectRef(rb)) = (a, b) {
        if ra == rb {
            return Ok(true);
        }
    }

    let ra = xref.resolve(a)?;
    let rb = xref.resolve(b)?;

    match (ra, rb) {
        (Object::Dict(da), Object::Dict(db)) => equal_dicts(da, db, xref, depth + 1),
        (Object::Stream(sa), Object::Stream(sb)) => {
            if sa.raw != sb.raw {
                return Ok(false);
            }
            equal_dicts(&sa.dict, &sb.dict, xref, depth + 1)
        }
        (Object::Array(aa), Object::Array(ab)) => {
            if aa.len() != ab.len() {
                return Ok(false);
            }
            for (ea, eb) in aa.iter().zip(ab.iter()) {
                if !eq_objects(ea, eb, xref, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(ra == rb),
    }
}

fn equal_dicts(a: &Dict, b: &Dict, xref: &XRefTable, depth: usize) -> PDFOptResult<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (key, va) in a.iter() {
        let vb = match b.get(key) {
            Some(v) => v,
            None => return Ok(false),
        };
        if !eq_objects(va, vb, xref, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}
