//! Byte-level checks of the x86-64 encoders used by the recompiler.

use mips3_backend::code_buffer::CodeBuffer;
use mips3_backend::x86_64::emitter::*;
use mips3_backend::x86_64::regs::*;
use mips3_core::Label;

fn bytes(f: impl FnOnce(&mut CodeBuffer)) -> Vec<u8> {
    let mut buf = CodeBuffer::new(4096).unwrap();
    f(&mut buf);
    buf.as_slice().to_vec()
}

#[test]
fn test_ret_push_pop() {
    assert_eq!(bytes(emit_ret), [0xC3]);
    assert_eq!(bytes(|b| emit_push(b, Reg::Rbp)), [0x55]);
    assert_eq!(bytes(|b| emit_push(b, Reg::R12)), [0x41, 0x54]);
    assert_eq!(bytes(|b| emit_pop(b, Reg::R15)), [0x41, 0x5F]);
}

#[test]
fn test_mov_forms() {
    // mov rax, rdi
    assert_eq!(bytes(|b| emit_mov_rr(b, true, Reg::Rax, Reg::Rdi)), [0x48, 0x89, 0xF8]);
    // xor eax, eax
    assert_eq!(bytes(|b| emit_mov_ri(b, false, Reg::Rax, 0)), [0x31, 0xC0]);
    // mov ecx, 5
    assert_eq!(bytes(|b| emit_mov_ri(b, true, Reg::Rcx, 5)), [0xB9, 5, 0, 0, 0]);
    // movabs rax, imm64
    let code = bytes(|b| emit_mov_ri(b, true, Reg::Rax, 0x1234_5678_9abc_def0));
    assert_eq!(&code[..2], &[0x48, 0xB8]);
    assert_eq!(code.len(), 10);
}

#[test]
fn test_state_relative_access() {
    // mov rax, [rbp+8]
    assert_eq!(bytes(|b| emit_load(b, true, Reg::Rax, AREG0, 8)), [0x48, 0x8B, 0x45, 0x08]);
    // mov [rsp+16], esi
    assert_eq!(
        bytes(|b| emit_store(b, false, P2, Reg::Rsp, SLOT_SAVE_P2)),
        [0x89, 0x74, 0x24, 0x10]
    );
    // rbp with no offset still needs a disp8
    assert_eq!(bytes(|b| emit_load(b, false, Reg::Rax, AREG0, 0)), [0x8B, 0x45, 0x00]);
}

#[test]
fn test_relative_branches() {
    // jmp to itself
    assert_eq!(bytes(|b| emit_jmp(b, 0)), [0xE9, 0xFB, 0xFF, 0xFF, 0xFF]);
    // call to the next instruction
    assert_eq!(bytes(|b| emit_call(b, 5)), [0xE8, 0, 0, 0, 0]);
}

#[test]
fn test_forward_label_is_patched() {
    let code = bytes(|b| {
        let mut label = Label::new();
        emit_jmp_label(b, &mut label);
        emit_ret(b);
        bind_label(b, &mut label);
    });
    // jmp over the ret
    assert_eq!(code, [0xE9, 1, 0, 0, 0, 0xC3]);
}

#[test]
fn test_frame_keeps_calls_aligned() {
    assert_eq!((PUSH_SIZE + STACK_ADDEND) % STACK_ALIGN, 0);
    assert!(STACK_ADDEND as i32 > SLOT_SAVE_P3);
}

#[test]
fn test_memory_operand_forms() {
    // rsp base takes a SIB byte
    assert_eq!(
        bytes(|b| emit_load(b, true, Reg::Rax, Reg::Rsp, 8)),
        [0x48, 0x8B, 0x44, 0x24, 0x08]
    );
    // cycle charge against icount with an imm32
    assert_eq!(
        bytes(|b| emit_arith_mi(b, ArithOp::Sub, false, AREG0, 0x10, 1000)),
        [0x81, 0x6D, 0x10, 0xE8, 0x03, 0x00, 0x00]
    );
    // sil needs a bare REX
    assert_eq!(bytes(|b| emit_store_byte(b, Reg::Rsi, Reg::Rax, 0)), [0x40, 0x88, 0x30]);
}

#[test]
fn test_conditions_invert_in_pairs() {
    assert_eq!(X86Cond::Jo.invert(), X86Cond::Jno);
    assert_eq!(X86Cond::Jae.invert(), X86Cond::Jb);
    assert_eq!(X86Cond::Jle.invert(), X86Cond::Jg);
    for c in [X86Cond::Je, X86Cond::Js, X86Cond::Jl, X86Cond::Jp] {
        assert_eq!(c.invert().invert(), c);
    }
}
