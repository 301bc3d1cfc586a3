pub mod movie;
pub mod role;
pub mod screening;
pub mod ticket;
pub mod user;
pub mod user_role;
