//! Request model and workflow patching for the text-to-image predictor.
//!
//! Nothing in this crate talks to the backend; it turns a
//! [`request::PredictionRequest`] into a ready-to-submit
//! [`workflow::Workflow`].

pub mod error;
pub mod request;
pub mod sampling;
pub mod workflow;
