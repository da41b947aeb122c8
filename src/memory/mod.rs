pub mod allocator;
pub mod planner;
pub mod provider;

pub use allocator::{
    MemoryAllocator,
    AllocatorReport,
};

pub use planner::{
    MemoryPlanner,
    MemoryPlan,
    PlanStep,
    TensorAllocation,
};

pub use provider::{
    MemoryProvider,
    SystemProvider,
    ArenaBuffer,
    Blob,
};
