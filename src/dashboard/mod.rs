//! HTTP status dashboard

pub mod server;

pub use server::DashboardServer;
