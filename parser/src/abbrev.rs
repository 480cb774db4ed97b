use fnv::FnvHashMap;
use log::trace;

use crate::{die, Error, Reader, Result};

/// One attribute specification within an abbreviation declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrSpec {
    pub at: gimli::DwAt,
    pub form: gimli::DwForm,
    /// The attribute value itself, for `DW_FORM_implicit_const`.
    pub implicit: Option<i64>,
}

/// One abbreviation declaration: the template a DIE is decoded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbbrevDecl {
    pub code: u64,
    pub tag: gimli::DwTag,
    pub has_children: bool,
    pub attrs: Vec<AttrSpec>,
}

/// The abbreviation table of one compile unit, keyed by abbreviation code.
#[derive(Debug, Default)]
pub struct AbbrevTable {
    decls: FnvHashMap<u64, AbbrevDecl>,
}

impl AbbrevTable {
    pub fn get(&self, code: u64) -> Option<&AbbrevDecl> {
        self.decls.get(&code)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }
}

fn malformed(offset: u64, reason: impl Into<String>) -> Error {
    Error::MalformedAbbrev {
        offset,
        reason: reason.into(),
    }
}

/// Parses the abbreviation block starting at the reader's position.
///
/// The block is a sequence of declarations terminated by a zero code; each
/// declaration's attribute list is terminated by a zero/zero pair. Any
/// truncation or unrecognized form fails the whole table with
/// [`Error::MalformedAbbrev`]; the caller scopes that to the one compile
/// unit that referenced this block.
pub fn parse_abbrev_table(r: &mut Reader<'_>) -> Result<AbbrevTable> {
    let mut table = AbbrevTable::default();
    loop {
        let decl_offset = r.offset();
        let code = r
            .uleb128()
            .map_err(|_| malformed(decl_offset, "truncated declaration code"))?;
        if code == 0 {
            trace!("abbrev table: {} declarations", table.len());
            return Ok(table);
        }

        let tag = gimli::DwTag(
            r.uleb128()
                .map_err(|_| malformed(decl_offset, "truncated tag"))?
                as u16,
        );
        let children = r
            .u8()
            .map_err(|_| malformed(decl_offset, "truncated children flag"))?;
        let has_children = match gimli::DwChildren(children) {
            gimli::DW_CHILDREN_no => false,
            gimli::DW_CHILDREN_yes => true,
            other => {
                return Err(malformed(
                    decl_offset,
                    format!("invalid children flag {}", other),
                ));
            }
        };

        let mut attrs = Vec::new();
        loop {
            let at = r
                .uleb128()
                .map_err(|_| malformed(decl_offset, "truncated attribute name"))?;
            let form = r
                .uleb128()
                .map_err(|_| malformed(decl_offset, "truncated attribute form"))?;
            if at == 0 && form == 0 {
                break;
            }
            let at = gimli::DwAt(at as u16);
            let form = gimli::DwForm(form as u16);
            let implicit = if form == gimli::DW_FORM_implicit_const {
                Some(
                    r.sleb128()
                        .map_err(|_| malformed(decl_offset, "truncated implicit const"))?,
                )
            } else {
                None
            };
            if !die::is_supported_form(form) {
                return Err(malformed(
                    decl_offset,
                    format!("unrecognized attribute form {}", form),
                ));
            }
            attrs.push(AttrSpec { at, form, implicit });
        }

        table.decls.insert(
            code,
            AbbrevDecl {
                code,
                tag,
                has_children,
                attrs,
            },
        );
    }
}
