pub mod backup;
pub mod batches;
pub mod catalog;
pub mod conference;
pub mod core;
pub mod courses;
pub mod enrollment;
pub mod setup;
pub mod sis;
