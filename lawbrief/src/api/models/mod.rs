//! Form payloads and page contexts.

pub mod pages;
pub mod revise;
