pub mod assistant;
pub mod auth;
pub mod dermatologists;
