use mips3_backend::code_buffer::CodeBuffer;

#[test]
fn test_emit_and_read() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u8(0x90); // NOP
    buf.emit_u32(0xDEADBEEF);
    assert_eq!(buf.offset(), 5);
    assert_eq!(buf.as_slice()[0], 0x90);
    assert_eq!(buf.read_u32(1), 0xDEADBEEF);
}

#[test]
fn test_patch() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(0);
    buf.patch_u32(0, 0x12345678);
    assert_eq!(buf.read_u32(0), 0x12345678);
}

#[test]
fn test_size_rounds_to_page() {
    let buf = CodeBuffer::new(100).unwrap();
    assert!(buf.capacity() >= 4096);
    assert_eq!(buf.capacity() % 4096, 0);
    assert_eq!(buf.remaining(), buf.capacity());
}

#[test]
fn test_addresses_map_back_to_offsets() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u64(0);
    let addr = buf.current_addr();
    assert_eq!(addr, buf.addr_at(8));
    assert_eq!(buf.offset_of_addr(addr), Some(8));
    assert_eq!(buf.offset_of_addr(buf.addr_at(0) + buf.capacity() as u64 + 1), None);
}

#[test]
fn test_reset_rewinds() {
    let mut buf = CodeBuffer::new(4096).unwrap();
    buf.emit_u32(1);
    buf.reset();
    assert_eq!(buf.offset(), 0);
    assert_eq!(buf.slice_from(0).len(), 0);
}
