//! Instruction disassembly. A thin wrapper around
//! `iced-x86`, formatting in AT&T/`gas` syntax to match the output lldb
//! and gdb users on Linux expect, and reading instruction bytes through
//! `Process::read_memory_without_traps` so a planted software breakpoint's
//! `0xCC` never shows up in the disassembly.

use iced_x86::{Decoder, DecoderOptions, Formatter, GasFormatter, Instruction};

use crate::error::Result;
use crate::process::Process;
use crate::types::VirtAddr;

#[derive(Debug, Clone)]
pub struct DisassembledInstruction {
    pub address: VirtAddr,
    pub text: String,
    pub length: usize,
}

/// Decodes up to `count` instructions starting at `address`, reading the
/// tracee's real (trap-masked) memory for the bytes.
pub fn disassemble(
    process: &mut Process,
    address: VirtAddr,
    count: usize,
) -> Result<Vec<DisassembledInstruction>> {
    // x86-64 instructions are at most 15 bytes; over-fetch so the last
    // requested instruction still has enough bytes to decode fully.
    let byte_budget = count * 15;
    let bytes = process.read_memory_without_traps(address, byte_budget)?;

    let mut decoder = Decoder::with_ip(64, &bytes, address.addr(), DecoderOptions::NONE);
    let mut formatter = GasFormatter::new();
    let mut out = Vec::with_capacity(count);
    let mut instr = Instruction::default();

    while out.len() < count && decoder.can_decode() {
        decoder.decode_out(&mut instr);
        let mut text = String::new();
        formatter.format(&instr, &mut text);
        out.push(DisassembledInstruction {
            address: VirtAddr::new(instr.ip()),
            text,
            length: instr.len(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_a_single_nop() {
        // 0x90 is a one-byte NOP; exercise the decoder directly without a
        // live process.
        let bytes = [0x90u8];
        let mut decoder = Decoder::with_ip(64, &bytes, 0x1000, DecoderOptions::NONE);
        let mut formatter = GasFormatter::new();
        let mut instr = Instruction::default();
        assert!(decoder.can_decode());
        decoder.decode_out(&mut instr);
        let mut text = String::new();
        formatter.format(&instr, &mut text);
        assert_eq!(text, "nop");
        assert_eq!(instr.len(), 1);
    }
}
