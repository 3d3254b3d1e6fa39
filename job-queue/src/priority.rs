//! Priority tiers (§3): lower value = higher priority, ties broken FIFO by
//! enqueue time (`JobQueueRecord::lease`'s `ORDER BY priority ASC, created_at ASC`).

pub const USER: i32 = 1;
pub const BATCH: i32 = 2;
pub const REPROCESS: i32 = 3;
