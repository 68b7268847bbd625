//! Attribute form decoding. Grounded in
//! the original `dwarf.cpp`'s `parse_die`, which switches on each
//! attribute's form exactly once while walking a DIE's fixed-size
//! abbreviation-described layout.

use crate::error::{Error, Result};

use super::abbrev::AttrSpec;
use super::cursor::Cursor;

#[allow(non_upper_case_globals, dead_code)]
pub mod form {
    pub const DW_FORM_addr: u64 = 0x01;
    pub const DW_FORM_block2: u64 = 0x03;
    pub const DW_FORM_block4: u64 = 0x04;
    pub const DW_FORM_data2: u64 = 0x05;
    pub const DW_FORM_data4: u64 = 0x06;
    pub const DW_FORM_data8: u64 = 0x07;
    pub const DW_FORM_string: u64 = 0x08;
    pub const DW_FORM_block: u64 = 0x09;
    pub const DW_FORM_block1: u64 = 0x0a;
    pub const DW_FORM_data1: u64 = 0x0b;
    pub const DW_FORM_flag: u64 = 0x0c;
    pub const DW_FORM_sdata: u64 = 0x0d;
    pub const DW_FORM_strp: u64 = 0x0e;
    pub const DW_FORM_udata: u64 = 0x0f;
    pub const DW_FORM_ref_addr: u64 = 0x10;
    pub const DW_FORM_ref1: u64 = 0x11;
    pub const DW_FORM_ref2: u64 = 0x12;
    pub const DW_FORM_ref4: u64 = 0x13;
    pub const DW_FORM_ref8: u64 = 0x14;
    pub const DW_FORM_ref_udata: u64 = 0x15;
    pub const DW_FORM_indirect: u64 = 0x16;
    pub const DW_FORM_sec_offset: u64 = 0x17;
    pub const DW_FORM_exprloc: u64 = 0x18;
    pub const DW_FORM_flag_present: u64 = 0x19;
    pub const DW_FORM_ref_sig8: u64 = 0x20;
}
use form::*;

#[derive(Debug, Clone)]
pub enum AttrValue {
    Address(u64),
    UData(u64),
    SData(i64),
    Block(Vec<u8>),
    ExprLoc(Vec<u8>),
    Str(String),
    /// Resolved to a global (section-relative) offset into `.debug_info`.
    Reference(u64),
    Flag(bool),
    SecOffset(u64),
}

impl AttrValue {
    pub fn as_address(&self) -> Option<u64> {
        match self {
            AttrValue::Address(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::UData(v) => Some(*v as i64),
            AttrValue::SData(v) => Some(*v),
            AttrValue::Address(v) => Some(*v as i64),
            AttrValue::SecOffset(v) => Some(*v as i64),
            _ => None,
        }
    }
    pub fn as_section_offset(&self) -> Option<u64> {
        match self {
            AttrValue::SecOffset(v) => Some(*v),
            AttrValue::UData(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_block(&self) -> Option<&[u8]> {
        match self {
            AttrValue::Block(b) | AttrValue::ExprLoc(b) => Some(b),
            _ => None,
        }
    }
    pub fn as_reference(&self) -> Option<u64> {
        match self {
            AttrValue::Reference(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_string(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_flag(&self) -> bool {
        matches!(self, AttrValue::Flag(true))
    }
}

/// Everything `parse_attr_value` needs to resolve forms that point
/// outside the current DIE (`strp` into `.debug_str`, `ref_addr`/`ref*`
/// into `.debug_info`).
pub struct FormContext<'a> {
    pub debug_str: &'a [u8],
    pub debug_info: &'a [u8],
    pub cu_offset: u64,
    pub address_size: u8,
    pub version: u16,
}

pub fn parse_attr_value(
    cursor: &mut Cursor<'_>,
    spec: &AttrSpec,
    ctx: &FormContext<'_>,
) -> Result<AttrValue> {
    if let Some(value) = spec.implicit_const {
        return Ok(AttrValue::SData(value));
    }
    parse_form(cursor, spec.form, ctx)
}

fn parse_form(cursor: &mut Cursor<'_>, form: u64, ctx: &FormContext<'_>) -> Result<AttrValue> {
    match form {
        DW_FORM_addr => Ok(AttrValue::Address(cursor.address(ctx.address_size)?)),
        DW_FORM_block2 => {
            let len = cursor.u16()? as usize;
            Ok(AttrValue::Block(cursor.block(len)?.to_vec()))
        }
        DW_FORM_block4 => {
            let len = cursor.u32()? as usize;
            Ok(AttrValue::Block(cursor.block(len)?.to_vec()))
        }
        DW_FORM_data2 => Ok(AttrValue::UData(cursor.u16()? as u64)),
        DW_FORM_data4 => Ok(AttrValue::UData(cursor.u32()? as u64)),
        DW_FORM_data8 => Ok(AttrValue::UData(cursor.u64()?)),
        DW_FORM_string => Ok(AttrValue::Str(cursor.string()?)),
        DW_FORM_block => {
            let len = cursor.uleb128()? as usize;
            Ok(AttrValue::Block(cursor.block(len)?.to_vec()))
        }
        DW_FORM_block1 => {
            let len = cursor.u8()? as usize;
            Ok(AttrValue::Block(cursor.block(len)?.to_vec()))
        }
        DW_FORM_data1 => Ok(AttrValue::UData(cursor.u8()? as u64)),
        DW_FORM_flag => Ok(AttrValue::Flag(cursor.u8()? != 0)),
        DW_FORM_sdata => Ok(AttrValue::SData(cursor.sleb128()?)),
        DW_FORM_strp => {
            let off = cursor.u32()? as usize;
            Ok(AttrValue::Str(read_cstr(ctx.debug_str, off)))
        }
        DW_FORM_udata => Ok(AttrValue::UData(cursor.uleb128()?)),
        DW_FORM_ref_addr => Ok(AttrValue::Reference(cursor.u32()? as u64)),
        DW_FORM_ref1 => Ok(AttrValue::Reference(ctx.cu_offset + cursor.u8()? as u64)),
        DW_FORM_ref2 => Ok(AttrValue::Reference(ctx.cu_offset + cursor.u16()? as u64)),
        DW_FORM_ref4 => Ok(AttrValue::Reference(ctx.cu_offset + cursor.u32()? as u64)),
        DW_FORM_ref8 => Ok(AttrValue::Reference(ctx.cu_offset + cursor.u64()?)),
        DW_FORM_ref_udata => Ok(AttrValue::Reference(ctx.cu_offset + cursor.uleb128()?)),
        DW_FORM_indirect => {
            let real_form = cursor.uleb128()?;
            parse_form(cursor, real_form, ctx)
        }
        DW_FORM_sec_offset => Ok(AttrValue::SecOffset(cursor.u32()? as u64)),
        DW_FORM_exprloc => {
            let len = cursor.uleb128()? as usize;
            Ok(AttrValue::ExprLoc(cursor.block(len)?.to_vec()))
        }
        DW_FORM_flag_present => Ok(AttrValue::Flag(true)),
        DW_FORM_ref_sig8 => Ok(AttrValue::Reference(cursor.u64()?)),
        other => Err(Error::format(format!("unsupported DWARF form {other:#x}"))),
    }
}

fn read_cstr(bytes: &[u8], offset: usize) -> String {
    if offset >= bytes.len() {
        return String::new();
    }
    let end = bytes[offset..].iter().position(|&b| b == 0).unwrap_or(0);
    String::from_utf8_lossy(&bytes[offset..offset + end]).into_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_udata1() {
        let bytes = [0x2a];
        let mut c = Cursor::new(&bytes);
        let ctx = FormContext {
            debug_str: &[],
            debug_info: &[],
            cu_offset: 0,
            address_size: 8,
            version: 4,
        };
        let v = parse_form(&mut c, DW_FORM_data1, &ctx).unwrap();
        assert_eq!(v.as_int(), Some(0x2a));
    }

    #[test]
    fn decodes_strp_via_debug_str() {
        let debug_str = b"\0hello\0";
        let bytes = [1u8, 0, 0, 0];
        let mut c = Cursor::new(&bytes);
        let ctx = FormContext {
            debug_str,
            debug_info: &[],
            cu_offset: 0,
            address_size: 8,
            version: 4,
        };
        let v = parse_form(&mut c, DW_FORM_strp, &ctx).unwrap();
        assert_eq!(v.as_string(), Some("hello"));
    }
}
