pub mod assistant;
pub mod auth;
