//! Linear memory.
//!
//! A byte vector growing in whole 64 KiB pages. Every access is
//! bounds-checked against the current size; addresses arrive as `u64`
//! effective addresses (32-bit base plus 32-bit constant offset), so the
//! arithmetic here cannot overflow. Multi-byte accesses are little-endian.

use byteorder::{ByteOrder, LittleEndian};

use crate::limits::{MEMORY_PAGES_LIMIT, PAGE_SIZE};

use super::Trap;

#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Allocate `pages` zeroed pages.
    pub fn new(pages: u32) -> Memory {
        Memory { data: vec![0; pages as usize * PAGE_SIZE] }
    }

    /// Wrap host-provided contents. The byte length need not be
    /// page-aligned; instantiation checks it against the provided limits.
    pub fn from_bytes(data: Vec<u8>) -> Memory {
        Memory { data }
    }

    /// Current size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Current size in whole pages.
    pub fn pages(&self) -> u32 {
        (self.data.len() / PAGE_SIZE) as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Grow by `delta` zeroed pages, returning the previous page count, or
    /// -1 without modifying memory if the new size would exceed `max_pages`.
    pub fn grow(&mut self, delta: u32, max_pages: u32) -> i32 {
        let current = self.pages();
        let Some(new_pages) = current.checked_add(delta) else {
            return -1;
        };
        if new_pages > max_pages || new_pages > MEMORY_PAGES_LIMIT {
            return -1;
        }
        self.data.resize(new_pages as usize * PAGE_SIZE, 0);
        current as i32
    }

    fn check(&self, addr: u64, len: usize) -> Result<usize, Trap> {
        let end = addr.checked_add(len as u64).ok_or(Trap::MemoryAccessOutOfBounds)?;
        if end > self.data.len() as u64 {
            return Err(Trap::MemoryAccessOutOfBounds);
        }
        Ok(addr as usize)
    }

    pub fn read_u8(&self, addr: u64) -> Result<u8, Trap> {
        let addr = self.check(addr, 1)?;
        Ok(self.data[addr])
    }

    pub fn read_u16(&self, addr: u64) -> Result<u16, Trap> {
        let addr = self.check(addr, 2)?;
        Ok(LittleEndian::read_u16(&self.data[addr..]))
    }

    pub fn read_u32(&self, addr: u64) -> Result<u32, Trap> {
        let addr = self.check(addr, 4)?;
        Ok(LittleEndian::read_u32(&self.data[addr..]))
    }

    pub fn read_u64(&self, addr: u64) -> Result<u64, Trap> {
        let addr = self.check(addr, 8)?;
        Ok(LittleEndian::read_u64(&self.data[addr..]))
    }

    pub fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), Trap> {
        let addr = self.check(addr, 1)?;
        self.data[addr] = value;
        Ok(())
    }

    pub fn write_u16(&mut self, addr: u64, value: u16) -> Result<(), Trap> {
        let addr = self.check(addr, 2)?;
        LittleEndian::write_u16(&mut self.data[addr..], value);
        Ok(())
    }

    pub fn write_u32(&mut self, addr: u64, value: u32) -> Result<(), Trap> {
        let addr = self.check(addr, 4)?;
        LittleEndian::write_u32(&mut self.data[addr..], value);
        Ok(())
    }

    pub fn write_u64(&mut self, addr: u64, value: u64) -> Result<(), Trap> {
        let addr = self.check(addr, 8)?;
        LittleEndian::write_u64(&mut self.data[addr..], value);
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), Trap> {
        let addr = self.check(addr, bytes.len())?;
        self.data[addr..addr + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}
