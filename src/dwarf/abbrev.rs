//! Abbreviation table parsing.
//! Grounded in the original `parse_abbrev_table`: each `.debug_abbrev`
//! sub-table is a sequence of `(code, tag, has_children, [(attr, form,
//! implicit_const?)...])` entries terminated by a zero code.

use std::collections::HashMap;

use crate::error::Result;

use super::cursor::Cursor;

pub const DW_FORM_IMPLICIT_CONST: u64 = 0x21;

#[derive(Debug, Clone)]
pub struct AttrSpec {
    pub attr: u64,
    pub form: u64,
    /// Only set for `DW_FORM_implicit_const`, whose value lives in the
    /// abbreviation entry itself rather than the DIE.
    pub implicit_const: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AbbrevDecl {
    pub code: u64,
    pub tag: u64,
    pub has_children: bool,
    pub attrs: Vec<AttrSpec>,
}

pub type AbbrevTable = HashMap<u64, AbbrevDecl>;

/// Parses the abbreviation table starting at `offset` in `.debug_abbrev`.
pub fn parse_abbrev_table(debug_abbrev: &[u8], offset: u64) -> Result<AbbrevTable> {
    let mut cursor = Cursor::at(debug_abbrev, offset as usize);
    let mut table = AbbrevTable::new();
    loop {
        if cursor.is_empty() {
            break;
        }
        let code = cursor.uleb128()?;
        if code == 0 {
            break;
        }
        let tag = cursor.uleb128()?;
        let has_children = cursor.u8()? != 0;
        let mut attrs = Vec::new();
        loop {
            let attr = cursor.uleb128()?;
            let form = cursor.uleb128()?;
            if attr == 0 && form == 0 {
                break;
            }
            let implicit_const = if form == DW_FORM_IMPLICIT_CONST {
                Some(cursor.sleb128()?)
            } else {
                None
            };
            attrs.push(AttrSpec {
                attr,
                form,
                implicit_const,
            });
        }
        table.insert(
            code,
            AbbrevDecl {
                code,
                tag,
                has_children,
                attrs,
            },
        );
    }
    Ok(table)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_single_entry_table() {
        // code=1, tag=0x11 (compile_unit), has_children=1,
        // attr=0x03(name) form=0x08(string), then terminator, then
        // table terminator.
        let bytes = [
            0x01, 0x11, 0x01, 0x03, 0x08, 0x00, 0x00, 0x00,
        ];
        let table = parse_abbrev_table(&bytes, 0).unwrap();
        let decl = table.get(&1).unwrap();
        assert_eq!(decl.tag, 0x11);
        assert!(decl.has_children);
        assert_eq!(decl.attrs.len(), 1);
        assert_eq!(decl.attrs[0].attr, 0x03);
    }
}
