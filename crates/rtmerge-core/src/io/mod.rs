//! IO modules - side effects (network, filesystem) and archive decoding

pub mod archive;
pub mod download;
pub mod layout;
