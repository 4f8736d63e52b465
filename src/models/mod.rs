pub mod expense;
pub mod session;
pub mod trip;
pub mod user;
