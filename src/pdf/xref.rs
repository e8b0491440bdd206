//! PDF cross-reference table: entry storage, free-list management,
//! dereferencing

use std::collections::{HashMap, HashSet};

use log::{debug, trace, warn};

use crate::error::{PDFOptError, PDFOptResult};
use crate::pdf::{Dict, IndirectRef, Object, StreamDict};

/// Generation number of the head free entry (object 0)
pub const FREE_HEAD_GENERATION: u16 = 65535;

// Indirect-ref chains are guaranteed cycle-free in well-formed input;
// the guard turns a corrupt cycle into an error instead of a hang.
const MAX_DEREF_DEPTH: usize = 100;

/// One cross-reference table entry
#[derive(Debug, Clone, PartialEq)]
pub enum XRefEntry {
    /// Unused object number, member of the free list
    Free {
        /// Next free object number, 0 terminates the list
        next_free: u32,
        /// Generation to be used when the number is reused
        generation: u16,
    },
    /// Object in use, stored uncompressed
    InUse {
        object: Object,
        generation: u16,
        /// Byte offset in the source file, if read from one
        offset: Option<u64>,
    },
    /// Object in use, stored inside an object stream
    Compressed {
        object: Object,
        /// Object number of the containing object stream
        object_stream: u32,
        /// Index within the object stream
        index: usize,
    },
}

impl XRefEntry {
    /// True for free entries
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    /// Generation number of this entry
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { generation, .. } => *generation,
            XRefEntry::InUse { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }

    /// The stored object for in-use and compressed entries
    pub fn object(&self) -> Option<&Object> {
        match self {
            XRefEntry::Free { .. } => None,
            XRefEntry::InUse { object, .. } => Some(object),
            XRefEntry::Compressed { object, .. } => Some(object),
        }
    }
}

/// Cross-reference table mapping object numbers to entries.
///
/// Object 0 is always free with generation 65535 and roots the singly
/// linked free list.
#[derive(Debug, Clone)]
pub struct XRefTable {
    table: HashMap<u32, XRefEntry>,
    /// Highest object number + 1
    pub size: u32,
    /// Document catalog
    pub root: Option<IndirectRef>,
    /// Document information dictionary
    pub info: Option<IndirectRef>,
    /// File identifier, an array of two byte strings
    pub id: Option<Vec<Object>>,
    /// Encryption dictionary
    pub encrypt: Option<IndirectRef>,
    /// Offset of the primary hint table of linearized input
    pub offset_primary_hint_table: Option<u64>,
    /// Offset of the overflow hint table of linearized input
    pub offset_overflow_hint_table: Option<u64>,
    /// Objects recognized as linearization metadata
    pub linearization_objs: HashSet<u32>,
    /// Off-spec additional streams declared in the source trailer
    pub additional_streams: Option<Vec<Object>>,
}

impl Default for XRefTable {
    fn default() -> Self {
        Self::new()
    }
}

impl XRefTable {
    /// Create a table holding only the free-list head
    pub fn new() -> Self {
        let mut table = HashMap::new();
        table.insert(
            0,
            XRefEntry::Free {
                next_free: 0,
                generation: FREE_HEAD_GENERATION,
            },
        );
        Self {
            table,
            size: 1,
            root: None,
            info: None,
            id: None,
            encrypt: None,
            offset_primary_hint_table: None,
            offset_overflow_hint_table: None,
            linearization_objs: HashSet::new(),
            additional_streams: None,
        }
    }

    /// Look up the entry for an object number
    pub fn find(&self, obj_nr: u32) -> Option<&XRefEntry> {
        self.table.get(&obj_nr)
    }

    /// Look up the entry for an object number, mutably
    pub fn find_mut(&mut self, obj_nr: u32) -> Option<&mut XRefEntry> {
        self.table.get_mut(&obj_nr)
    }

    /// Install an entry under a specific object number
    pub fn insert(&mut self, obj_nr: u32, entry: XRefEntry) {
        self.table.insert(obj_nr, entry);
        if obj_nr >= self.size {
            self.size = obj_nr + 1;
        }
    }

    /// Install an in-use, generation-0 entry for an object
    pub fn insert_object(&mut self, obj_nr: u32, object: Object) {
        self.insert(
            obj_nr,
            XRefEntry::InUse {
                object,
                generation: 0,
                offset: None,
            },
        );
    }

    /// Replace the object stored under an in-use or compressed entry
    pub fn update_object(&mut self, obj_nr: u32, object: Object) -> PDFOptResult<()> {
        match self.table.get_mut(&obj_nr) {
            Some(XRefEntry::InUse { object: slot, .. })
            | Some(XRefEntry::Compressed { object: slot, .. }) => {
                *slot = object;
                Ok(())
            }
            Some(XRefEntry::Free { .. }) => Err(PDFOptError::invariant(format!(
                "update of free object #{}",
                obj_nr
            ))),
            None => Err(PDFOptError::ObjectNotFound(obj_nr)),
        }
    }

    /// Insert an entry, preferring a recycled number from the free list.
    ///
    /// The head of the free list is reused if available, otherwise the
    /// table grows by one.
    pub fn insert_and_use_recycled(&mut self, entry: XRefEntry) -> PDFOptResult<u32> {
        let head_next = self.free_head_next()?;

        if head_next != 0 {
            let next_next = match self.table.get(&head_next) {
                Some(XRefEntry::Free { next_free, .. }) => *next_free,
                _ => {
                    return Err(PDFOptError::invariant(format!(
                        "free list head points to non-free object #{}",
                        head_next
                    )))
                }
            };
            self.set_free_head_next(next_next);
            self.table.insert(head_next, entry);
            debug!("recycled object number {}", head_next);
            return Ok(head_next);
        }

        let obj_nr = self.size;
        self.insert(obj_nr, entry);
        debug!("appended object number {}", obj_nr);
        Ok(obj_nr)
    }

    /// Mark an object free and splice it in at the head of the free list
    pub fn delete_object(&mut self, obj_nr: u32) -> PDFOptResult<()> {
        if obj_nr == 0 {
            return Err(PDFOptError::invariant("cannot delete object 0"));
        }

        let generation = match self.table.get(&obj_nr) {
            Some(entry) => entry.generation(),
            None => return Err(PDFOptError::ObjectNotFound(obj_nr)),
        };

        let head_next = self.free_head_next()?;
        self.table.insert(
            obj_nr,
            XRefEntry::Free {
                next_free: head_next,
                generation,
            },
        );
        self.set_free_head_next(obj_nr);

        trace!("freed object #{}", obj_nr);
        Ok(())
    }

    /// Validate and repair the free list.
    ///
    /// After this call the list starting at object 0 terminates at 0 and
    /// visits every free entry exactly once. A dangling link is patched to
    /// 0, orphaned free entries are spliced in at the head, and a cycle is
    /// an invariant violation.
    pub fn ensure_valid_free_list(&mut self) -> PDFOptResult<()> {
        self.table.entry(0).or_insert(XRefEntry::Free {
            next_free: 0,
            generation: FREE_HEAD_GENERATION,
        });

        let mut visited = HashSet::new();
        let mut current = 0u32;

        loop {
            if !visited.insert(current) {
                return Err(PDFOptError::invariant(format!(
                    "free list loop at object #{}",
                    current
                )));
            }

            let next = match self.table.get(&current) {
                Some(XRefEntry::Free { next_free, .. }) => *next_free,
                _ => {
                    warn!("free list link to non-free object #{}, relinking to 0", current);
                    // current was reached via a free entry's link; detach
                    visited.remove(&current);
                    self.patch_link_to_zero(&visited, current);
                    break;
                }
            };

            if next == 0 {
                break;
            }
            if !self.table.contains_key(&next) {
                warn!("free list link to missing object #{}, relinking to 0", next);
                if let Some(XRefEntry::Free { next_free, .. }) = self.table.get_mut(&current) {
                    *next_free = 0;
                }
                break;
            }
            current = next;
        }

        // Splice orphaned free entries in at the head.
        let orphans: Vec<u32> = self
            .table
            .iter()
            .filter(|(nr, e)| e.is_free() && !visited.contains(nr))
            .map(|(nr, _)| *nr)
            .collect();

        for obj_nr in orphans {
            debug!("relinking orphaned free object #{}", obj_nr);
            let head_next = self.free_head_next()?;
            if let Some(XRefEntry::Free { next_free, .. }) = self.table.get_mut(&obj_nr) {
                *next_free = head_next;
            }
            self.set_free_head_next(obj_nr);
        }

        Ok(())
    }

    fn patch_link_to_zero(&mut self, visited: &HashSet<u32>, broken: u32) {
        for nr in visited {
            if let Some(XRefEntry::Free { next_free, .. }) = self.table.get_mut(nr) {
                if *next_free == broken {
                    *next_free = 0;
                }
            }
        }
    }

    fn free_head_next(&self) -> PDFOptResult<u32> {
        match self.table.get(&0) {
            Some(XRefEntry::Free { next_free, .. }) => Ok(*next_free),
            _ => Err(PDFOptError::invariant("object 0 is not a free entry")),
        }
    }

    fn set_free_head_next(&mut self, next: u32) {
        if let Some(XRefEntry::Free { next_free, .. }) = self.table.get_mut(&0) {
            *next_free = next;
        }
    }

    /// Resolve an object, following indirect references through the table.
    ///
    /// References to free entries resolve to Null.
    pub fn dereference(&self, obj: &Object) -> PDFOptResult<Object> {
        Ok(self.resolve(obj)?.clone())
    }

    /// Borrowing variant of [`dereference`](Self::dereference).
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> PDFOptResult<&'a Object> {
        static NULL: Object = Object::Null;

        let mut current = obj;
        for _ in 0..MAX_DEREF_DEPTH {
            let ind_ref = match current {
                Object::IndirectRef(r) => *r,
                _ => return Ok(current),
            };
            current = match self.table.get(&ind_ref.obj_nr) {
                Some(XRefEntry::InUse { object, .. }) => object,
                Some(XRefEntry::Compressed { object, .. }) => object,
                Some(XRefEntry::Free { .. }) => return Ok(&NULL),
                None => return Err(PDFOptError::ObjectNotFound(ind_ref.obj_nr)),
            };
        }

        Err(PDFOptError::corrupt("indirect reference chain too deep"))
    }

    /// Dereference to a dictionary; Null resolves to None
    pub fn dereference_dict(&self, obj: &Object) -> PDFOptResult<Option<Dict>> {
        match self.resolve(obj)? {
            Object::Null => Ok(None),
            Object::Dict(d) => Ok(Some(d.clone())),
            other => Err(PDFOptError::TypeMismatch {
                expected: "Dict",
                found: other.variant_name().to_string(),
            }),
        }
    }

    /// Dereference to an array; Null resolves to None
    pub fn dereference_array(&self, obj: &Object) -> PDFOptResult<Option<Vec<Object>>> {
        match self.resolve(obj)? {
            Object::Null => Ok(None),
            Object::Array(a) => Ok(Some(a.clone())),
            other => Err(PDFOptError::TypeMismatch {
                expected: "Array",
                found: other.variant_name().to_string(),
            }),
        }
    }

    /// Dereference to a stream dict; Null resolves to None
    pub fn dereference_stream_dict(&self, obj: &Object) -> PDFOptResult<Option<StreamDict>> {
        match self.resolve(obj)? {
            Object::Null => Ok(None),
            Object::Stream(sd) => Ok(Some(sd.clone())),
            other => Err(PDFOptError::TypeMismatch {
                expected: "Stream",
                found: other.variant_name().to_string(),
            }),
        }
    }
}
