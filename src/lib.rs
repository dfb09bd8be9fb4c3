//! Client for a pneumonia-diagnosis backend.
//!
//! Collects patient intake data and a chest X-ray, submits them for
//! inference, requests Grad-CAM/LIME/occlusion explanations and browses past
//! reports, from the command line or a local web workspace.

pub mod analytics;
pub mod api;
pub mod cli;
pub mod config;
pub mod form;
pub mod model;
pub mod multipart;
pub mod web;
pub mod workspace;
