// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

pub mod checker;
pub mod clock_pool;
pub mod fem;
pub mod stream;

pub use checker::Verdict;
pub use clock_pool::ClockPool;
pub use stream::{RecoveryEvent, StreamAligner};
