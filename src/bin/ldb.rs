//! The `ldb` REPL binary. A thin glue layer: parse a command line, call
//! the matching `Target`/`Process` method, print the result. All the real
//! behavior lives in the `ldb` library; this binary only translates text.
//!
//! Grounded in `samply/src/main.rs`'s `env_logger::init()` +
//! `clap::Parser` startup shape.

use std::io::{self, Write as _};

use clap::Parser;
use ldb::breakpoint::BreakpointKind;
use ldb::error::{Error, Result};
use ldb::process::{Process, ProcessState, StopReason, TrapReason};
use ldb::register_info::{self, RegisterId, RegisterType};
use ldb::registers::RegisterValue;
use ldb::target::Target;
use ldb::types::VirtAddr;

#[derive(Parser)]
#[command(name = "ldb", about = "A source-level debugger for x86-64 Linux")]
struct Opt {
    /// Program to launch and debug.
    #[arg(long, conflicts_with = "pid")]
    program: Option<String>,

    /// Arguments to pass to the launched program.
    #[arg(long, requires = "program")]
    args: Vec<String>,

    /// Pid of an already-running process to attach to, instead of launching one.
    #[arg(short = 'p', long)]
    pid: Option<i32>,

    /// Disable ASLR for the launched program.
    #[arg(long)]
    no_aslr: bool,
}

fn main() {
    env_logger::init();
    let opt = Opt::parse();

    let mut target = match build_target(&opt) {
        Ok(target) => target,
        Err(err) => {
            eprintln!("ldb: {err}");
            std::process::exit(1);
        }
    };

    let stdin = io::stdin();
    let mut last_line = String::new();
    loop {
        print!("ldb> ");
        io::stdout().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        let line = line.trim();
        // Like gdb/lldb, a bare Enter re-runs the last non-empty command.
        let line = if line.is_empty() { last_line.as_str() } else { line };
        if line.is_empty() {
            continue;
        }
        last_line = line.to_string();

        if matches!(line, "quit" | "q" | "exit") {
            break;
        }

        if let Err(err) = handle_command(&mut target, line) {
            eprintln!("error: {err}");
        }
    }
}

fn build_target(opt: &Opt) -> Result<Box<Target>> {
    if let Some(pid) = opt.pid {
        return Target::attach(pid);
    }
    let program = opt
        .program
        .as_ref()
        .ok_or_else(|| Error::format("either --program or --pid is required"))?;
    Target::launch(std::path::Path::new(program), &opt.args, opt.no_aslr)
}

fn handle_command(target: &mut Target, line: &str) -> Result<()> {
    let mut parts = line.split_whitespace();
    let command = parts.next().unwrap_or("");
    let rest: Vec<&str> = parts.collect();

    match command {
        "continue" | "c" => {
            target.process_mut().resume()?;
            let reason = target.process_mut().wait_on_signal()?;
            print_stop_reason(target.process(), reason);
        }
        "step" | "stepi" => {
            let reason = target.step_instruction()?;
            print_stop_reason(target.process(), reason);
        }
        "step-in" | "stepin" => {
            let reason = target.step_in()?;
            print_stop_reason(target.process(), reason);
        }
        "step-over" | "stepover" => {
            let reason = target.step_over()?;
            print_stop_reason(target.process(), reason);
        }
        "step-out" | "stepout" => {
            let reason = target.step_out()?;
            print_stop_reason(target.process(), reason);
        }
        "register" | "reg" => handle_register(target, &rest)?,
        "breakpoint" | "break" | "b" => handle_breakpoint(target, &rest)?,
        "memory" | "mem" => handle_memory(target, &rest)?,
        "watchpoint" | "watch" => handle_watchpoint(target, &rest)?,
        "disassemble" | "disas" => handle_disassemble(target, &rest)?,
        other => return Err(Error::format(format!("unknown command: {other}"))),
    }
    Ok(())
}

fn print_stop_reason(process: &Process, reason: StopReason) {
    match reason.state {
        ProcessState::Exited => println!("Process {} exited with status {}", process.pid(), reason.info),
        ProcessState::Terminated => {
            let name = signal_name(reason.info);
            println!("Process {} terminated with signal {name}", process.pid())
        }
        ProcessState::Stopped => {
            let pc = process.registers().read_by_id(RegisterId::rip).as_u64().unwrap_or(0);
            let name = signal_name(reason.info);
            println!("Process {} stopped with signal {name} at {pc:#x}", process.pid());
            match reason.trap_reason {
                Some(TrapReason::SoftwareBreak) => {
                    if let Some(id) = reason.stoppoint_id {
                        println!("  hit breakpoint {id}");
                    }
                }
                Some(TrapReason::HardwareBreak) => {
                    if let Some(id) = reason.stoppoint_id {
                        println!("  hit watchpoint {id}");
                    }
                }
                Some(TrapReason::Syscall) => println!("  stopped at a syscall boundary"),
                _ => {}
            }
        }
        ProcessState::Running => println!("Process {} running", process.pid()),
    }
}

fn signal_name(sig: i32) -> String {
    unsafe {
        let ptr = libc::strsignal(sig);
        if ptr.is_null() {
            return sig.to_string();
        }
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn handle_register(target: &mut Target, args: &[&str]) -> Result<()> {
    match args {
        ["read", "all"] | ["read"] => {
            for info in register_info::REGISTER_INFOS {
                if info.kind == RegisterType::Gpr {
                    let value = target.process().registers().read(info);
                    println!("{}:\t{:?}", info.name, value);
                }
            }
        }
        ["read", name] => {
            let info = register_info::by_name(name)?;
            let value = target.process().registers().read_by_id(info.id);
            println!("{name}:\t{value:?}");
        }
        ["write", name, value] => {
            let info = register_info::by_name(name)?;
            let parsed = parse_literal(value)?;
            target.process_mut().registers_mut().write_by_id(info.id, parsed)?;
        }
        _ => return Err(Error::format("usage: register read [name|all] | register write name value")),
    }
    Ok(())
}

fn handle_breakpoint(target: &mut Target, args: &[&str]) -> Result<()> {
    match args {
        ["set", rest @ ..] => {
            let kind = parse_breakpoint_spec(rest)?;
            let id = target.create_breakpoint(kind, false)?;
            target.enable_breakpoint(id)?;
            println!("breakpoint {id} set");
        }
        ["list"] => {
            for bp in target.breakpoints() {
                println!(
                    "{}: {:?} (enabled={}, sites={})",
                    bp.id(),
                    bp.kind(),
                    bp.is_enabled(),
                    bp.site_ids().count()
                );
            }
        }
        ["enable", id] => target.enable_breakpoint(parse_id(id)?)?,
        ["disable", id] => target.disable_breakpoint(parse_id(id)?)?,
        ["delete", id] => target.remove_breakpoint(parse_id(id)?)?,
        _ => {
            return Err(Error::format(
                "usage: breakpoint set address|--function name|--line file:line | list | enable|disable|delete id",
            ))
        }
    }
    Ok(())
}

fn parse_breakpoint_spec(args: &[&str]) -> Result<BreakpointKind> {
    match args {
        ["--function", name] => Ok(BreakpointKind::Function { name: (*name).to_string() }),
        ["--line", spec] => {
            let (file, line) = spec
                .rsplit_once(':')
                .ok_or_else(|| Error::format("expected file:line"))?;
            let line: u64 = line.parse().map_err(|_| Error::format("invalid line number"))?;
            Ok(BreakpointKind::Line { file: file.to_string(), line })
        }
        [addr] => Ok(BreakpointKind::Address { address: VirtAddr::new(parse_hex(addr)?) }),
        _ => Err(Error::format("usage: breakpoint set address|--function name|--line file:line")),
    }
}

fn handle_memory(target: &mut Target, args: &[&str]) -> Result<()> {
    match args {
        ["read", addr] => {
            let bytes = target.process_mut().read_memory(VirtAddr::new(parse_hex(addr)?), 16)?;
            print_bytes(&bytes);
        }
        ["read", addr, n] => {
            let n: usize = n.parse().map_err(|_| Error::format("invalid byte count"))?;
            let bytes = target.process_mut().read_memory(VirtAddr::new(parse_hex(addr)?), n)?;
            print_bytes(&bytes);
        }
        ["write", addr, bytes_literal] => {
            let bytes = parse_byte_vector(bytes_literal)?;
            target.process_mut().write_memory(VirtAddr::new(parse_hex(addr)?), &bytes)?;
        }
        _ => return Err(Error::format("usage: memory read addr [n] | memory write addr [bytes]")),
    }
    Ok(())
}

fn handle_watchpoint(target: &mut Target, args: &[&str]) -> Result<()> {
    match args {
        ["set", addr, "--mode", mode, "--size", size] => {
            let mode = match *mode {
                "write" => ldb::types::StoppointMode::Write,
                "rw" => ldb::types::StoppointMode::ReadWrite,
                "execute" => ldb::types::StoppointMode::Execute,
                other => return Err(Error::format(format!("unknown watchpoint mode {other}"))),
            };
            let size: usize = size.parse().map_err(|_| Error::format("invalid watchpoint size"))?;
            let id = target
                .process_mut()
                .create_watchpoint(VirtAddr::new(parse_hex(addr)?), mode, size)?;
            target
                .process_mut()
                .watchpoints_mut()
                .get_by_id_mut(id)
                .map(|w| w.enable())
                .transpose()?;
            println!("watchpoint {id} set");
        }
        _ => return Err(Error::format("usage: watchpoint set addr --mode={write|rw|execute} --size={1,2,4,8}")),
    }
    Ok(())
}

fn handle_disassemble(target: &mut Target, args: &[&str]) -> Result<()> {
    let mut address = None;
    let mut count = 5usize;
    let mut iter = args.iter();
    while let Some(&flag) = iter.next() {
        match flag {
            "-a" => address = Some(parse_hex(iter.next().ok_or_else(|| Error::format("-a needs an address"))?)?),
            "-c" => {
                count = iter
                    .next()
                    .ok_or_else(|| Error::format("-c needs a count"))?
                    .parse()
                    .map_err(|_| Error::format("invalid count"))?
            }
            other => return Err(Error::format(format!("unknown disassemble flag {other}"))),
        }
    }
    let address = match address {
        Some(a) => VirtAddr::new(a),
        None => VirtAddr::new(target.process().registers().read_by_id(RegisterId::rip).as_u64()?),
    };
    for instr in ldb::disassembler::disassemble(target.process_mut(), address, count)? {
        println!("{:#x}: {}", instr.address.addr(), instr.text);
    }
    Ok(())
}

fn print_bytes(bytes: &[u8]) {
    let hex: Vec<String> = bytes.iter().map(|b| format!("{b:#04x}")).collect();
    println!("[{}]", hex.join(", "));
}

fn parse_id(text: &str) -> Result<i32> {
    text.parse().map_err(|_| Error::format(format!("invalid id {text}")))
}

fn parse_hex(text: &str) -> Result<u64> {
    let text = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(text, 16).map_err(|_| Error::format(format!("invalid hex literal {text}")))
}

fn parse_literal(text: &str) -> Result<RegisterValue> {
    let value = parse_hex(text)?;
    Ok(RegisterValue::U64(value))
}

/// Parses a bracketed byte-vector literal `[0xNN,0xNN,...]`: each element
/// must be exactly the four characters `0xNN`, separated by a single `,`,
/// with a trailing `]` and nothing else after it.
fn parse_byte_vector(text: &str) -> Result<Vec<u8>> {
    let inner = text
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| Error::format("byte vector must be bracketed, e.g. [0x01,0x02]"))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|chunk| {
            let chunk = chunk.trim();
            let digits = chunk
                .strip_prefix("0x")
                .ok_or_else(|| Error::format(format!("invalid byte literal {chunk}")))?;
            if digits.len() != 2 {
                return Err(Error::format(format!("invalid byte literal {chunk}")));
            }
            u8::from_str_radix(digits, 16).map_err(|_| Error::format(format!("invalid byte literal {chunk}")))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_byte_vector_literal() {
        assert_eq!(parse_byte_vector("[0x01,0x02,0xff]").unwrap(), vec![0x01, 0x02, 0xff]);
        assert_eq!(parse_byte_vector("[]").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn rejects_malformed_byte_vector() {
        assert!(parse_byte_vector("[0x1]").is_err());
        assert!(parse_byte_vector("0x01,0x02]").is_err());
    }

    #[test]
    fn parses_line_breakpoint_spec() {
        match parse_breakpoint_spec(&["--line", "main.c:42"]).unwrap() {
            BreakpointKind::Line { file, line } => {
                assert_eq!(file, "main.c");
                assert_eq!(line, 42);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
