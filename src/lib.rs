//! Invoice retrieval robot for the Endesa business portals.
//!
//! A run logs into the portal, walks every entity and results page for a
//! date range, downloads each row's documents and extracts billing fields
//! from them into [`model::InvoiceRecord`]s.

pub mod calendar;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod maintenance;
pub mod merge;
pub mod model;
pub mod portal;
pub mod request;
pub mod robot;
pub mod storage;

pub use config::{Config, Credentials};
pub use error::RobotError;
pub use model::{InvoiceRecord, PortalVariant};
pub use robot::Robot;
