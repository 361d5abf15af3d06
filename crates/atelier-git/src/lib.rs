pub mod driver;
pub mod stack;
pub mod toolchain;

pub use driver::{CommitInfo, DiffInfo, FileDiff, FileStatus, GitDriver, RepoInfo};
pub use stack::detect_stack;
pub use toolchain::{run_build, run_lint, run_tests, CheckOutcome};
