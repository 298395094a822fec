// 运行时：Runner 迭代驱动、运行指标与生命周期事件

mod runner;
mod types;

pub use runner::Runner;
pub use types::{RunMetrics, RunOutcome, RunnerEvent, RunnerListener, RunnerMetrics};
