//! Document Schemas for Perception
//!
//! Every persisted entity has an explicit struct here. Conversion to and from
//! store documents happens once, in the store adapter.

pub mod article;
pub mod author;
pub mod brief;
pub mod common;
pub mod contracts;
pub mod ingestion_run;
pub mod source;

pub use article::*;
pub use author::*;
pub use brief::*;
pub use common::*;
pub use contracts::*;
pub use ingestion_run::*;
pub use source::*;
