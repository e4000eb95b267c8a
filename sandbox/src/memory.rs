//! Guest linear memory access with bounds checking.
//!
//! Every pointer/length pair handed over by a guest is validated against
//! the current memory size before use. Violations surface to the guest as
//! `ERR_BAD_POINTER`.

use wasmtime::{AsContextMut, Memory};

use ledgerbox_primitives::ErrorCode;

use crate::runtime::StoreData;

/// Size of one Wasm page.
pub const PAGE_SIZE: usize = 65_536;

/// Initial host allocation region size in pages (4 pages = 256 KiB).
pub const HOST_ALLOC_PAGES: u64 = 4;

fn checked_range(mem_len: usize, ptr: i32, len: i32) -> Result<(usize, usize), ErrorCode> {
    if ptr < 0 || len < 0 {
        return Err(ErrorCode::BadPointer);
    }
    let start = ptr as usize;
    let end = start
        .checked_add(len as usize)
        .ok_or(ErrorCode::BadPointer)?;
    if end > mem_len {
        return Err(ErrorCode::BadPointer);
    }
    Ok((start, end))
}

/// Copy `len` bytes starting at `ptr` out of guest memory.
pub fn read_bytes(mem: &[u8], ptr: i32, len: i32) -> Result<Vec<u8>, ErrorCode> {
    let (start, end) = checked_range(mem.len(), ptr, len)?;
    Ok(mem[start..end].to_vec())
}

pub fn read_i32(mem: &[u8], ptr: i32) -> Result<i32, ErrorCode> {
    let (start, end) = checked_range(mem.len(), ptr, 4)?;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&mem[start..end]);
    Ok(i32::from_le_bytes(raw))
}

pub fn write_i32(mem: &mut [u8], ptr: i32, value: i32) -> Result<(), ErrorCode> {
    let (start, end) = checked_range(mem.len(), ptr, 4)?;
    mem[start..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Check that `[ptr, ptr + len)` lies inside memory.
pub fn validate_range(mem_len: usize, ptr: i32, len: i32) -> Result<(), ErrorCode> {
    checked_range(mem_len, ptr, len).map(|_| ())
}

fn align8(size: usize) -> usize {
    (size + 7) & !7
}

/// Bump allocator over a host-owned region of guest memory.
///
/// The region is reserved by growing memory right after instantiation.
/// Nothing is ever freed: the instance lives for one invocation only.
#[derive(Debug, Clone, Default)]
pub struct HostAllocator {
    base: usize,
    bump: usize,
    capacity: usize,
}

/// Outcome of [`HostAllocator::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub ptr: usize,
    pub new_bump: usize,
    pub new_capacity: usize,
    /// Pages memory must grow by before `ptr` may be written.
    pub grow_pages: u64,
}

impl HostAllocator {
    pub fn new(base: usize, capacity: usize) -> Self {
        Self {
            base,
            bump: 0,
            capacity,
        }
    }

    /// First address past the region.
    pub fn end(&self) -> usize {
        self.base + self.capacity
    }

    pub fn plan(&self, size: usize) -> Allocation {
        let aligned = align8(size.max(1));
        let new_bump = self.bump + aligned;
        let (new_capacity, grow_pages) = if new_bump <= self.capacity {
            (self.capacity, 0)
        } else {
            let extra = (new_bump - self.capacity).div_ceil(PAGE_SIZE);
            (self.capacity + extra * PAGE_SIZE, extra as u64)
        };
        Allocation {
            ptr: self.base + self.bump,
            new_bump,
            new_capacity,
            grow_pages,
        }
    }

    pub fn commit(&mut self, allocation: &Allocation) {
        self.bump = allocation.new_bump;
        self.capacity = allocation.new_capacity;
    }
}

/// Copy `data` into the host region and return its guest address.
///
/// Empty data is not copied and yields address 0.
pub fn alloc_and_write<C>(memory: &Memory, mut ctx: C, data: &[u8]) -> Result<i32, ErrorCode>
where
    C: AsContextMut<Data = StoreData>,
{
    if data.is_empty() {
        return Ok(0);
    }
    let mut store = ctx.as_context_mut();
    let allocation = store.data().host_alloc.plan(data.len());
    if allocation.grow_pages > 0 {
        // The region can only be extended while it still ends the memory.
        let region_end = store.data().host_alloc.end();
        if memory.data_size(&store) != region_end {
            return Err(ErrorCode::Internal);
        }
        memory
            .grow(&mut store, allocation.grow_pages)
            .map_err(|_| ErrorCode::Internal)?;
    }
    let end = allocation.ptr + data.len();
    let ptr = i32::try_from(allocation.ptr).map_err(|_| ErrorCode::Internal)?;
    memory
        .data_mut(&mut store)
        .get_mut(allocation.ptr..end)
        .ok_or(ErrorCode::Internal)?
        .copy_from_slice(data);
    store.data_mut().host_alloc.commit(&allocation);
    Ok(ptr)
}

/// Write `data` into the host region and store its pointer and length into
/// the guest's two output slots.
pub fn write_output<C>(
    memory: &Memory,
    mut ctx: C,
    data: &[u8],
    out_ptr_ptr: i32,
    out_len_ptr: i32,
) -> Result<(), ErrorCode>
where
    C: AsContextMut<Data = StoreData>,
{
    let mut store = ctx.as_context_mut();
    let ptr = alloc_and_write(memory, &mut store, data)?;
    let len = i32::try_from(data.len()).map_err(|_| ErrorCode::Internal)?;
    let mem = memory.data_mut(&mut store);
    write_i32(mem, out_ptr_ptr, ptr)?;
    write_i32(mem, out_len_ptr, len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bytes_basic() {
        let mem = vec![10, 20, 30, 40, 50];
        assert_eq!(read_bytes(&mem, 1, 3).unwrap(), vec![20, 30, 40]);
        assert_eq!(read_bytes(&mem, 5, 0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_read_bytes_out_of_bounds() {
        let mem = vec![10, 20, 30];
        assert_eq!(read_bytes(&mem, 1, 3), Err(ErrorCode::BadPointer));
        assert_eq!(read_bytes(&mem, -1, 1), Err(ErrorCode::BadPointer));
        assert_eq!(read_bytes(&mem, 0, -1), Err(ErrorCode::BadPointer));
        assert_eq!(read_bytes(&mem, i32::MAX, i32::MAX), Err(ErrorCode::BadPointer));
    }

    #[test]
    fn test_read_write_i32() {
        let mut mem = vec![0; 16];
        write_i32(&mut mem, 4, 0x12345678).unwrap();
        assert_eq!(read_i32(&mem, 4).unwrap(), 0x12345678);
        assert!(write_i32(&mut mem, 13, 1).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range(100, 0, 100).is_ok());
        assert!(validate_range(100, 0, 101).is_err());
        assert!(validate_range(100, -1, 1).is_err());
    }

    #[test]
    fn test_allocator_aligns() {
        let mut alloc = HostAllocator::new(1000, 1000);
        let first = alloc.plan(10);
        alloc.commit(&first);
        let second = alloc.plan(20);
        assert_eq!(first.ptr, 1000);
        assert_eq!(second.ptr, 1016);
        assert_eq!(second.grow_pages, 0);
    }

    #[test]
    fn test_allocator_requests_growth() {
        let alloc = HostAllocator::new(PAGE_SIZE, 64);
        let plan = alloc.plan(100);
        assert_eq!(plan.ptr, PAGE_SIZE);
        assert_eq!(plan.grow_pages, 1);
        assert!(plan.new_capacity >= plan.new_bump);
    }
}
