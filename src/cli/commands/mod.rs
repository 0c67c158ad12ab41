pub mod build;
pub mod checksum;
pub mod manifest;
pub mod serve;
