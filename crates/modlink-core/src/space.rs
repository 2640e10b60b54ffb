//! Sparse device memory.
//!
//! An [`AddressSpace`] is a sorted list of non-overlapping blocks over the
//! 16-bit address range. Writes that touch or overlap existing blocks merge
//! them into one; removals truncate or split them. Every operation runs under
//! the space's own lock, so a merge or split is never observed half done.

use crate::endian::{ModbusEndian, RegisterValue};
use crate::pdu::ExceptionCode;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

const ADDRESS_LIMIT: u32 = 0x1_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressSpaceError {
    #[error("illegal data address: {count} unit(s) starting at {start}")]
    IllegalDataAddress { start: u16, count: usize },
}

impl From<AddressSpaceError> for ExceptionCode {
    fn from(_: AddressSpaceError) -> Self {
        ExceptionCode::IllegalDataAddress
    }
}

/// Bytes stored per address.
pub trait AddressUnit {
    const UNIT_SIZE: usize;
}

/// One byte per address, `0` or `1`.
#[derive(Debug, Clone, Copy)]
pub struct Bit;

/// Two big-endian bytes per address.
#[derive(Debug, Clone, Copy)]
pub struct Register;

impl AddressUnit for Bit {
    const UNIT_SIZE: usize = 1;
}

impl AddressUnit for Register {
    const UNIT_SIZE: usize = 2;
}

pub type BitSpace = AddressSpace<Bit>;
pub type RegisterSpace = AddressSpace<Register>;

/// Inclusive address range of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRange {
    pub start: u16,
    pub end: u16,
}

#[derive(Debug, Clone)]
struct AddressBlock {
    start: u32,
    // Always a whole number of units.
    raw: Vec<u8>,
}

impl AddressBlock {
    fn end(&self, unit: usize) -> u32 {
        self.start + (self.raw.len() / unit) as u32 - 1
    }
}

#[derive(Debug)]
struct Blocks {
    blocks: Vec<AddressBlock>,
    auto_allocation: bool,
}

fn illegal(start: u16, count: usize) -> AddressSpaceError {
    AddressSpaceError::IllegalDataAddress { start, count }
}

fn span(start: u16, count: usize) -> Result<(u32, u32), AddressSpaceError> {
    let first = u32::from(start);
    if count > ADDRESS_LIMIT as usize || first + count as u32 > ADDRESS_LIMIT {
        return Err(illegal(start, count));
    }
    Ok((first, first + count as u32 - 1))
}

impl Blocks {
    fn locate(&self, address: u32, unit: usize) -> Option<usize> {
        let index = self
            .blocks
            .partition_point(|block| block.start <= address)
            .checked_sub(1)?;
        (self.blocks[index].end(unit) >= address).then_some(index)
    }

    fn read(&self, start: u16, count: usize, unit: usize) -> Result<Vec<u8>, AddressSpaceError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let (first, last) = span(start, count)?;
        let mut index = self.locate(first, unit).ok_or(illegal(start, count))?;
        let mut out = Vec::with_capacity(count * unit);
        let mut address = first;

        while address <= last {
            // Blocks never overlap, so a continuation must start exactly here.
            let block = self
                .blocks
                .get(index)
                .filter(|block| block.start <= address)
                .ok_or(illegal(start, count))?;
            let stop = last.min(block.end(unit));
            let from = (address - block.start) as usize * unit;
            let to = (stop - block.start + 1) as usize * unit;
            out.extend_from_slice(&block.raw[from..to]);
            address = stop + 1;
            index += 1;
        }
        Ok(out)
    }

    /// Writes `raw` at `start`. With `preserve` set, existing bytes win over
    /// `raw`, which is how allocation keeps data it did not create.
    fn write(
        &mut self,
        start: u16,
        raw: &[u8],
        unit: usize,
        preserve: bool,
    ) -> Result<(), AddressSpaceError> {
        let count = raw.len() / unit;
        if count == 0 {
            return Ok(());
        }
        let (first, last) = span(start, count)?;

        if let Some(index) = self.locate(first, unit) {
            let block = &mut self.blocks[index];
            if block.end(unit) >= last {
                if !preserve {
                    let offset = (first - block.start) as usize * unit;
                    block.raw[offset..offset + raw.len()].copy_from_slice(raw);
                }
                return Ok(());
            }
        }

        if !self.auto_allocation {
            return Err(illegal(start, count));
        }

        let lo = self
            .blocks
            .partition_point(|block| block.end(unit) + 1 < first);
        let hi = self.blocks.partition_point(|block| block.start <= last + 1);
        let merged = &self.blocks[lo..hi];

        let merged_start = merged.first().map_or(first, |block| block.start.min(first));
        let merged_end = merged.last().map_or(last, |block| block.end(unit).max(last));
        let mut buf = vec![0u8; (merged_end - merged_start + 1) as usize * unit];
        let mut place = |at: u32, bytes: &[u8]| {
            let offset = (at - merged_start) as usize * unit;
            buf[offset..offset + bytes.len()].copy_from_slice(bytes);
        };

        if !preserve {
            for block in merged {
                place(block.start, &block.raw);
            }
            place(first, raw);
        } else {
            place(first, raw);
            for block in merged {
                place(block.start, &block.raw);
            }
        }

        self.blocks.splice(
            lo..hi,
            [AddressBlock {
                start: merged_start,
                raw: buf,
            }],
        );
        Ok(())
    }

    fn remove(&mut self, start: u16, count: usize, unit: usize) {
        if count == 0 {
            return;
        }
        let first = u32::from(start);
        let last = (first + count.min(ADDRESS_LIMIT as usize) as u32 - 1).min(ADDRESS_LIMIT - 1);

        let mut kept = Vec::with_capacity(self.blocks.len() + 1);
        for block in self.blocks.drain(..) {
            let end = block.end(unit);
            if end < first || block.start > last {
                kept.push(block);
                continue;
            }
            if block.start < first {
                let head = (first - block.start) as usize * unit;
                kept.push(AddressBlock {
                    start: block.start,
                    raw: block.raw[..head].to_vec(),
                });
            }
            if end > last {
                let tail = (last + 1 - block.start) as usize * unit;
                kept.push(AddressBlock {
                    start: last + 1,
                    raw: block.raw[tail..].to_vec(),
                });
            }
        }
        self.blocks = kept;
    }
}

/// Sparse memory of one Modbus object type.
pub struct AddressSpace<U> {
    inner: Mutex<Blocks>,
    _unit: PhantomData<fn() -> U>,
}

impl<U: AddressUnit> Default for AddressSpace<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: AddressUnit> fmt::Debug for AddressSpace<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("unit_size", &U::UNIT_SIZE)
            .field("blocks", &self.blocks())
            .field("auto_allocation", &self.auto_allocation())
            .finish()
    }
}

impl<U: AddressUnit> AddressSpace<U> {
    pub fn new() -> Self {
        Self::with_auto_allocation(true)
    }

    pub fn with_auto_allocation(auto_allocation: bool) -> Self {
        Self {
            inner: Mutex::new(Blocks {
                blocks: Vec::new(),
                auto_allocation,
            }),
            _unit: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Blocks> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn auto_allocation(&self) -> bool {
        self.lock().auto_allocation
    }

    pub fn set_auto_allocation(&self, enabled: bool) {
        self.lock().auto_allocation = enabled;
    }

    /// Raw bytes of a single address.
    pub fn get(&self, address: u16) -> Result<Vec<u8>, AddressSpaceError> {
        self.get_data(address, 1)
    }

    /// Raw bytes of `count` addresses. The range may span adjacent blocks but
    /// must be fully covered.
    pub fn get_data(&self, start: u16, count: usize) -> Result<Vec<u8>, AddressSpaceError> {
        self.lock().read(start, count, U::UNIT_SIZE)
    }

    /// Writes raw bytes starting at `start`. A trailing partial unit is
    /// zero-padded.
    pub fn set_data(&self, start: u16, raw: &[u8]) -> Result<(), AddressSpaceError> {
        let unit = U::UNIT_SIZE;
        if raw.len() % unit == 0 {
            return self.lock().write(start, raw, unit, false);
        }
        let mut padded = raw.to_vec();
        padded.resize(raw.len().div_ceil(unit) * unit, 0);
        self.lock().write(start, &padded, unit, false)
    }

    /// Ensures `count` addresses exist, zero-filling new ones.
    pub fn allocate(&self, start: u16, count: usize) -> Result<(), AddressSpaceError> {
        if count == 0 {
            return Ok(());
        }
        span(start, count)?;
        let zeros = vec![0u8; count * U::UNIT_SIZE];
        self.lock().write(start, &zeros, U::UNIT_SIZE, true)
    }

    /// Drops `count` addresses. Uncovered addresses are ignored.
    pub fn remove(&self, start: u16, count: usize) {
        self.lock().remove(start, count, U::UNIT_SIZE);
    }

    pub fn contains(&self, start: u16, count: usize) -> bool {
        count > 0 && self.get_data(start, count).is_ok()
    }

    pub fn blocks(&self) -> Vec<BlockRange> {
        self.lock()
            .blocks
            .iter()
            .map(|block| BlockRange {
                start: block.start as u16,
                end: block.end(U::UNIT_SIZE) as u16,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().blocks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lock().blocks.is_empty()
    }
}

impl AddressSpace<Bit> {
    pub fn get_bit(&self, address: u16) -> Result<bool, AddressSpaceError> {
        Ok(self.get(address)?[0] != 0)
    }

    pub fn set_bit(&self, address: u16, value: bool) -> Result<(), AddressSpaceError> {
        self.set_data(address, &[u8::from(value)])
    }

    pub fn read_bits(&self, start: u16, count: usize) -> Result<Vec<bool>, AddressSpaceError> {
        Ok(self
            .get_data(start, count)?
            .into_iter()
            .map(|byte| byte != 0)
            .collect())
    }

    pub fn write_bits(&self, start: u16, values: &[bool]) -> Result<(), AddressSpaceError> {
        let raw: Vec<u8> = values.iter().map(|value| u8::from(*value)).collect();
        self.set_data(start, &raw)
    }
}

impl AddressSpace<Register> {
    pub fn get_register(&self, address: u16) -> Result<u16, AddressSpaceError> {
        let raw = self.get(address)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub fn set_register(&self, address: u16, value: u16) -> Result<(), AddressSpaceError> {
        self.set_data(address, &value.to_be_bytes())
    }

    pub fn read_registers(&self, start: u16, count: usize) -> Result<Vec<u16>, AddressSpaceError> {
        Ok(self
            .get_data(start, count)?
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    pub fn write_registers(&self, start: u16, values: &[u16]) -> Result<(), AddressSpaceError> {
        let raw: Vec<u8> = values.iter().flat_map(|value| value.to_be_bytes()).collect();
        self.set_data(start, &raw)
    }

    /// Reads a value spanning `T::REGISTERS` registers from `address`.
    pub fn get_value<T: RegisterValue>(
        &self,
        address: u16,
        endian: ModbusEndian,
    ) -> Result<T, AddressSpaceError> {
        let raw = self.get_data(address, T::REGISTERS)?;
        T::from_wire(&raw, endian).ok_or(illegal(address, T::REGISTERS))
    }

    pub fn set_value<T: RegisterValue>(
        &self,
        address: u16,
        value: T,
        endian: ModbusEndian,
    ) -> Result<(), AddressSpaceError> {
        self.set_data(address, &value.to_wire(endian))
    }
}
