//! Metric samplers read by the periodic snapshot loop.

pub mod cpu;
pub mod frame;
pub mod memory;

pub use cpu::CpuSampler;
pub use frame::{FrameCallback, FrameScheduler, FrameTimeCollector, ManualFrameClock};
pub use memory::{heap_allocated_bytes, MemoryProbe, MemoryUsage};
