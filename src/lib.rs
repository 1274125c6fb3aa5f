pub mod app;
pub mod finder;
pub mod models;
pub mod registrar;
pub mod rss;
pub mod store;
pub mod tmdb;
pub mod trakt;
