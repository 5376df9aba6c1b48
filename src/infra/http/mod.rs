//! Demo HTTP surface: a small `teams` controller wired through the output cache.

mod middleware;
mod teams;

pub use middleware::{CurrentUser, USER_HEADER, log_responses, resolve_principal};
pub use teams::{Team, TeamInput, TeamsState, build_router, teams_controller};
