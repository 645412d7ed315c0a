pub mod docker_manager;

pub use docker_manager::{start_dev_stack, stop_dev_stack};
