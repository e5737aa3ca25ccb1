pub mod artifact;
pub mod backend;
pub mod features;
pub mod histogram;
pub mod scale;
