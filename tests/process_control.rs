//! End-to-end process-control scenarios, run against fixtures compiled on
//! the fly by `tests/common/mod.rs`. Grounded in spec.md §8's boundary
//! scenarios 1, 2 and 4, plus the memory write/read round-trip law.

mod common;

use std::fs;
use std::os::fd::AsRawFd;
use std::process::{Command, Stdio};

use ldb::pipe::Pipe;
use ldb::process::{Process, ProcessState};
use ldb::register_info::RegisterId;
use ldb::registers::RegisterValue;
use ldb::types::VirtAddr;

fn process_status(pid: i32) -> char {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).expect("read /proc/<pid>/stat");
    let after_comm = stat.rfind(')').expect("well-formed stat line") + 2;
    stat[after_comm..].chars().next().expect("status char present")
}

#[test]
fn launch_a_program_that_exits_immediately() {
    let bin = common::compile_fixture("end_immediately");
    let mut proc = Process::launch(&bin, &[], true).unwrap();

    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();

    assert_eq!(reason.state, ProcessState::Exited);
    assert_eq!(reason.info, 0);
    assert!(proc.resume().is_err());
}

#[test]
fn attach_then_drop_leaves_child_running() {
    let bin = common::compile_fixture("run_endlessly");
    let mut child = Command::new(&bin)
        .stdout(Stdio::null())
        .spawn()
        .expect("spawn untraced fixture");
    let pid = child.id() as i32;

    // Give the freshly spawned process a moment to reach the sleep loop.
    std::thread::sleep(std::time::Duration::from_millis(50));
    let status_before = process_status(pid);
    assert!(status_before == 'R' || status_before == 'S');

    {
        let proc = Process::attach(pid).unwrap();
        assert_eq!(process_status(pid), 't');
        drop(proc);
    }

    std::thread::sleep(std::time::Duration::from_millis(50));
    let status_after = process_status(pid);
    assert!(status_after == 'R' || status_after == 'S');

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn register_write_is_visible_to_the_tracee() {
    let bin = common::compile_fixture("reg_write");

    // A close-on-exec-free pipe whose write end is handed to the child's
    // stdout, matching the original `reg_write` harness's use of `Pipe`.
    let mut channel = Pipe::new(false).unwrap();
    let write_fd = channel.release_write().expect("write end still owned");

    let mut proc =
        Process::launch_redirecting_stdout(&bin, &[], true, Some(write_fd.as_raw_fd())).unwrap();
    drop(write_fd);

    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Stopped);

    proc.registers_mut()
        .write_by_id(RegisterId::rsi, RegisterValue::U64(0xcafecafe))
        .unwrap();

    proc.resume().unwrap();
    proc.wait_on_signal().unwrap();

    let output = channel.read().unwrap();
    assert_eq!(String::from_utf8_lossy(&output), "0xcafecafe");
}

#[test]
fn memory_write_then_read_round_trips() {
    let bin = common::compile_fixture("memory");

    let mut channel = Pipe::new(false).unwrap();
    let write_fd = channel.release_write().expect("write end still owned");
    let mut proc =
        Process::launch_redirecting_stdout(&bin, &[], true, Some(write_fd.as_raw_fd())).unwrap();
    drop(write_fd);

    // First stop: the fixture has written `&a` (holding 0xcafecafe) to the
    // pipe and is about to `raise(SIGTRAP)`.
    proc.resume().unwrap();
    proc.wait_on_signal().unwrap();
    let a_addr_bytes = channel.read().unwrap();
    let a_addr = VirtAddr::new(u64::from_le_bytes(a_addr_bytes.try_into().unwrap()));

    let a_value = proc.read_memory(a_addr, 8).unwrap();
    assert_eq!(u64::from_le_bytes(a_value.try_into().unwrap()), 0xcafecafe);

    // Second stop: the fixture has written `&b` (an empty 12-byte buffer)
    // to the pipe and is about to `raise(SIGTRAP)` again, then print `b`.
    proc.resume().unwrap();
    proc.wait_on_signal().unwrap();
    let b_addr_bytes = channel.read().unwrap();
    let b_addr = VirtAddr::new(u64::from_le_bytes(b_addr_bytes.try_into().unwrap()));

    proc.write_memory(b_addr, b"hello\0").unwrap();
    let read_back = proc.read_memory(b_addr, 6).unwrap();
    assert_eq!(&read_back, b"hello\0");

    proc.resume().unwrap();
    let reason = proc.wait_on_signal().unwrap();
    assert_eq!(reason.state, ProcessState::Exited);
    let output = channel.read().unwrap();
    assert_eq!(output, b"hello");
}
