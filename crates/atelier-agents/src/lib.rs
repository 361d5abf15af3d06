pub mod board;
pub mod dev;
pub mod integration;
pub mod lens;
pub mod pm;
pub mod qa;
pub mod seams;

pub use board::{BoardAgent, BoardPlan, Escalation, WorkType};
pub use dev::{ClaudeCli, CodingCli, DevAgent, DevOutcome};
pub use integration::{FollowUp, IntegrationAgent, IntegrationOutcome, RepoUpdate};
pub use lens::LensPicker;
pub use pm::{PmAgent, PmOutcome};
pub use qa::{QaAgent, QaOutcome};
pub use seams::{HostToolchain, Toolchain, Vcs};
