pub mod archive;
pub mod filesystem;
pub mod s3;
