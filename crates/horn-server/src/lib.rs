// Main library module for Horn - streams Twins notifications to Twinface clients

pub mod metrics; // Metrics descriptions
pub mod model; // Configuration
pub mod queue; // AMQP publishing
pub mod startup; // Application startup utilities

pub use model::config::Configuration;
