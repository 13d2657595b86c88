//! Admission control for scarce external resources.
//!
//! Knows nothing about AI or questions; the worker uses it to cap concurrent
//! generation calls globally and per user.

mod controller;

pub use controller::{AdmissionController, AdmissionPermit, AdmissionStats, AdmissionSubject, AdmissionToken};
