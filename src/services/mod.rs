pub mod feature_flags;
pub mod scheduler;
pub mod shutdown;

pub use feature_flags::{FeatureFlag, FeatureFlagService};
pub use scheduler::TokioScheduler;
pub use shutdown::Shutdown;
#[cfg(test)]
pub use scheduler::ManualScheduler;
