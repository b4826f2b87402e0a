//! Byte-addressable memory backing `@low`-register pointer code (spec
//! section 4.3/4.4, "Low-register memory"): `ALLOC`/`FREE` and the
//! `LOAD_*`/`STORE_*` family all address this arena through
//! `Value::Pointer`.
//!
//! A bump allocator: `FREE` marks a region free but the arena never
//! compacts or reuses the hole (acceptable for the short-lived guest
//! programs this VM runs; a real allocator is out of scope here).

use ouro_core::value::TypedPointer;
use ouro_core::RuntimeErrorKind;

use crate::error::VmError;

#[derive(Default)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new() -> Self {
        Memory::default()
    }

    pub fn alloc(&mut self, size: usize, elem_size: u8) -> TypedPointer {
        let address = self.bytes.len();
        self.bytes.resize(address + size, 0);
        TypedPointer { address, elem_size }
    }

    /// No-op beyond bounds validation: see the module doc.
    pub fn free(&self, ptr: TypedPointer) -> Result<(), VmError> {
        self.bounds_check(ptr.address, 1)?;
        Ok(())
    }

    fn bounds_check(&self, address: usize, len: usize) -> Result<(), VmError> {
        if address + len > self.bytes.len() {
            return Err(VmError::Runtime(RuntimeErrorKind::IndexOutOfRange {
                index: address as i64,
                length: self.bytes.len(),
            }));
        }
        Ok(())
    }

    pub fn load(&self, address: usize, width: usize) -> Result<i64, VmError> {
        self.bounds_check(address, width)?;
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&self.bytes[address..address + width]);
        Ok(match width {
            1 => buf[0] as i8 as i64,
            2 => i16::from_le_bytes([buf[0], buf[1]]) as i64,
            4 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64,
            8 => i64::from_le_bytes(buf),
            _ => unreachable!("width is always 1/2/4/8"),
        })
    }

    pub fn store(&mut self, address: usize, width: usize, value: i64) -> Result<(), VmError> {
        self.bounds_check(address, width)?;
        let bytes = value.to_le_bytes();
        self.bytes[address..address + width].copy_from_slice(&bytes[..width]);
        Ok(())
    }
}
