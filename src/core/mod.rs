//! 核心基础设施：错误分类、时钟、优雅关闭、宿主构建

pub mod builder;
pub mod clock;
pub mod error;
pub mod shutdown;

pub use builder::{create_host_builder, HostBuilder};
pub use clock::{AnchoredClock, Clock, SystemClock};
pub use error::{ModuleError, StoreError};
pub use shutdown::{ShutdownCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
