//! Data access and business rules, one service per resource.
//!
//! Each service is a cheap clone around the shared connection pool and is
//! handed to request handlers through [`crate::AppState`].

pub mod movies;
pub mod screenings;
pub mod tickets;
pub mod users;

pub use movies::MovieService;
pub use screenings::ScreeningService;
pub use tickets::{TicketScope, TicketService};
pub use users::UserService;

pub(crate) fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}
