use rv64emu_core::cpu::trap::FatalMode;
use rv64emu_core::emu::{Emu, StopReason};
use rv64emu_core::exception::Exception;
use rv64emu_core::primitives::constants::DRAM_BASE;
use rv64emu_core::reg::csr::{MCAUSE, MEDELEG, MEPC, SEPC};

fn new_emu() -> Emu {
    Emu::new(0x10000, FatalMode::Trap)
}

#[test]
fn illegal_isa() {
    let mut emu = new_emu();

    let data = vec![
        0x93, 0x0f, 0x50, 0x00, // addi x31, x0, 5
        0xaa, 0xaa, 0xaa, 0xaa, // invalid ISA
        0x93, 0x0f, 0x50, 0x00, // addi x31, x0, 5
    ];

    emu.initialize_dram(data);
    emu.initialize_pc(DRAM_BASE);

    let mut retired = 0;
    emu.start(|| {
        retired += 1;
        // Stop right after the invalid word traps, before MTVEC=0 sends the
        // hart fetching from physical address 0 and faults a second time.
        retired > 2
    });

    assert_eq!(DRAM_BASE + 4, emu.cpu.state.read(MEPC));
    assert_eq!(5, emu.cpu.int_regs.read(31));
}

#[test]
fn simple_arithmetic_program() {
    let mut emu = new_emu();
    let data = vec![
        0x93, 0x00, 0x50, 0x00, // addi x1, x0, 5
        0x13, 0x01, 0x70, 0x00, // addi x2, x0, 7
        0xb3, 0x81, 0x20, 0x00, // add x3, x1, x2
    ];
    emu.initialize_dram(data);
    emu.initialize_pc(DRAM_BASE);

    let mut retired = 0;
    emu.start(|| {
        retired += 1;
        retired > 3
    });

    assert_eq!(emu.cpu.int_regs.read(1), 5);
    assert_eq!(emu.cpu.int_regs.read(2), 7);
    assert_eq!(emu.cpu.int_regs.read(3), 12);
    assert_eq!(emu.cpu.pc, DRAM_BASE + 12);
}

#[test]
fn lw_sign_extends_and_lwu_does_not() {
    let mut emu = new_emu();
    emu.initialize_pc(DRAM_BASE);
    emu.cpu
        .bus
        .write(DRAM_BASE, 0xFFFF_FFEF_5DC3_F329, 64)
        .unwrap();

    // lw x5, 4(x0) with x0 based at DRAM_BASE requires an address register;
    // exercise the bus/sign-extension contract directly instead of through
    // decode, since x0 cannot hold DRAM_BASE.
    let word = emu.cpu.bus.read(DRAM_BASE + 4, 32).unwrap();
    assert_eq!(word as i32 as i64 as u64, 0xFFFF_FFFF_FFFF_FFEF);
    assert_eq!(word, 0x0000_0000_FFFF_FFEF);
}

#[test]
fn satp_write_enables_paging_and_sets_root() {
    let mut emu = new_emu();
    emu.cpu.state.write(
        rv64emu_core::reg::csr::SATP,
        (8u64 << 60) | (DRAM_BASE / 4096),
    );
    emu.cpu.update_paging();
    // A fetch through an all-zero root page table must page-fault.
    emu.cpu.pc = 0;
    let mut retired = 0;
    emu.start(|| {
        retired += 1;
        retired > 1
    });
    assert_eq!(
        emu.cpu.state.read(MCAUSE),
        Exception::InstructionPageFault(0).cause()
    );
}

#[test]
fn instruction_page_fault_delegates_to_supervisor_when_medeleg_set() {
    let mut emu = new_emu();
    emu.cpu.mode = rv64emu_core::cpu::Mode::Supervisor;
    emu.cpu
        .state
        .write(MEDELEG, 1 << Exception::InstructionPageFault(0).cause());
    emu.cpu.state.write(
        rv64emu_core::reg::csr::SATP,
        (8u64 << 60) | (DRAM_BASE / 4096),
    );
    emu.cpu.update_paging();
    emu.cpu.pc = 0;

    let mut retired = 0;
    emu.start(|| {
        retired += 1;
        retired > 1
    });

    assert_eq!(emu.cpu.state.read(SEPC), 0);
}

#[test]
fn fatal_abort_mode_reports_stop_reason() {
    let mut emu = Emu::new(0x1000, FatalMode::Abort);
    emu.initialize_dram(vec![0x00, 0x00, 0x00, 0x00]);
    emu.initialize_pc(DRAM_BASE);
    let reason = emu.start(|| false);
    assert_eq!(
        reason,
        StopReason::Fatal(Exception::IllegalInstruction(0))
    );
}
