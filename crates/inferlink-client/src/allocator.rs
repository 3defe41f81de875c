use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use inferlink_core::{
    Allocation, BufferToken, MemoryType, OutputBuffer, ResponseAllocator, Result,
};
use tracing::info;

const UNKNOWN_TENSOR: &str = "<unknown>";

/// Allocates result tensors in plain host memory, tagging each buffer with
/// its tensor name so releases can be reported.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostAllocator;

impl HostAllocator {
    pub fn new() -> Self {
        Self
    }
}

impl ResponseAllocator for HostAllocator {
    fn allocate(
        &self,
        tensor_name: &str,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<Allocation> {
        let token: BufferToken = Box::new(tensor_name.to_string());

        if byte_size == 0 {
            info!(tensor = tensor_name, "allocated 0 bytes for result tensor");
            return Ok(Allocation::empty(token));
        }

        if memory_type != MemoryType::Cpu {
            info!(
                tensor = tensor_name,
                byte_size,
                %memory_type,
                "failed to allocate bytes for result tensor"
            );
            return Ok(Allocation::unsatisfied());
        }

        info!(tensor = tensor_name, byte_size, "allocated bytes for result tensor");
        Ok(Allocation::new(
            OutputBuffer::zeroed(byte_size, memory_type, memory_type_id),
            token,
        ))
    }

    fn release(
        &self,
        buffer: OutputBuffer,
        token: Option<BufferToken>,
        byte_size: usize,
        _memory_type: MemoryType,
        _memory_type_id: i64,
    ) -> Result<()> {
        let name = tensor_name(token);
        info!(
            buffer = ?buffer.as_ptr(),
            byte_size,
            tensor = %name,
            "releasing result buffer"
        );
        drop(buffer);
        Ok(())
    }
}

/// Recovers the tensor name stored as a token, or a placeholder.
pub fn tensor_name(token: Option<BufferToken>) -> String {
    token
        .and_then(|t| t.downcast::<String>().ok())
        .map(|name| *name)
        .unwrap_or_else(|| UNKNOWN_TENSOR.to_string())
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub allocations: usize,
    pub releases: usize,
    pub unsatisfied: usize,
    pub empty: usize,
}

impl AllocatorStats {
    pub fn outstanding(&self) -> usize {
        self.allocations.saturating_sub(self.releases)
    }
}

#[derive(Default)]
struct Counters {
    allocations: AtomicUsize,
    releases: AtomicUsize,
    unsatisfied: AtomicUsize,
    empty: AtomicUsize,
}

/// Wraps another allocator and counts what flows through it.
pub struct CountingAllocator {
    inner: Arc<dyn ResponseAllocator>,
    counters: Counters,
}

impl CountingAllocator {
    pub fn new(inner: Arc<dyn ResponseAllocator>) -> Self {
        Self {
            inner,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> AllocatorStats {
        AllocatorStats {
            allocations: self.counters.allocations.load(Ordering::Acquire),
            releases: self.counters.releases.load(Ordering::Acquire),
            unsatisfied: self.counters.unsatisfied.load(Ordering::Acquire),
            empty: self.counters.empty.load(Ordering::Acquire),
        }
    }
}

impl ResponseAllocator for CountingAllocator {
    fn allocate(
        &self,
        tensor_name: &str,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<Allocation> {
        let allocation = self
            .inner
            .allocate(tensor_name, byte_size, memory_type, memory_type_id)?;
        let counter = if allocation.buffer.is_some() {
            &self.counters.allocations
        } else if allocation.is_unsatisfied() {
            &self.counters.unsatisfied
        } else {
            &self.counters.empty
        };
        counter.fetch_add(1, Ordering::AcqRel);
        Ok(allocation)
    }

    fn release(
        &self,
        buffer: OutputBuffer,
        token: Option<BufferToken>,
        byte_size: usize,
        memory_type: MemoryType,
        memory_type_id: i64,
    ) -> Result<()> {
        self.counters.releases.fetch_add(1, Ordering::AcqRel);
        self.inner
            .release(buffer, token, byte_size, memory_type, memory_type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_bytes_never_allocates() {
        let allocator = HostAllocator::new();
        for memory_type in [MemoryType::Cpu, MemoryType::CpuPinned, MemoryType::Gpu] {
            let allocation = allocator.allocate("OUTPUT0", 0, memory_type, 0).unwrap();
            assert!(allocation.buffer.is_none());
            assert_eq!(tensor_name(allocation.token), "OUTPUT0");
        }
    }

    #[test]
    fn device_memory_is_unsatisfied() {
        let allocation = HostAllocator::new()
            .allocate("OUTPUT0", 64, MemoryType::Gpu, 0)
            .unwrap();
        assert!(allocation.is_unsatisfied());
    }

    #[test]
    fn host_allocation_is_sized_and_tagged() {
        let allocation = HostAllocator::new()
            .allocate("OUTPUT1", 64, MemoryType::Cpu, 0)
            .unwrap();
        let buffer = allocation.buffer.expect("buffer");
        assert!(buffer.len() >= 64);
        assert_eq!(buffer.memory_type(), MemoryType::Cpu);
        assert_eq!(tensor_name(allocation.token), "OUTPUT1");
    }

    #[test]
    fn release_tolerates_missing_token() {
        let buffer = OutputBuffer::zeroed(8, MemoryType::Cpu, 0);
        HostAllocator::new()
            .release(buffer, None, 8, MemoryType::Cpu, 0)
            .unwrap();
        assert_eq!(tensor_name(None), UNKNOWN_TENSOR);
        assert_eq!(tensor_name(Some(Box::new(7u32) as BufferToken)), UNKNOWN_TENSOR);
    }

    #[test]
    fn counting_allocator_tracks_outcomes() {
        let counting = CountingAllocator::new(Arc::new(HostAllocator::new()));
        let a = counting.allocate("A", 16, MemoryType::Cpu, 0).unwrap();
        counting.allocate("B", 0, MemoryType::Cpu, 0).unwrap();
        counting.allocate("C", 16, MemoryType::Gpu, 0).unwrap();
        assert_eq!(counting.stats().outstanding(), 1);

        counting
            .release(a.buffer.unwrap(), a.token, 16, MemoryType::Cpu, 0)
            .unwrap();
        assert_eq!(
            counting.stats(),
            AllocatorStats {
                allocations: 1,
                releases: 1,
                unsatisfied: 1,
                empty: 1,
            }
        );
        assert_eq!(counting.stats().outstanding(), 0);
    }
}
