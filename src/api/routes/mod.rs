pub mod alerts;
pub mod health;
pub mod services;
pub mod stats;
