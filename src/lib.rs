//! Groups the faces found in a photo library into people.
//!
//! A scan walks a directory tree, registers each new image once by content
//! fingerprint, stores the faces the extractor finds, and then reclusters
//! every stored face, carrying user-given names over to the new clusters.

pub mod config;
pub mod db;
pub mod export;
pub mod faces;
pub mod logging;
pub mod people;
pub mod scanner;
