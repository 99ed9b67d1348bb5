pub mod vpc;

pub use vpc::{VpcConfig, VpcGateway};
