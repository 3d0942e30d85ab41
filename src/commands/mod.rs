pub mod apply;
pub mod outputs;
pub mod plan;
pub mod project;
pub mod refresh;
pub mod validate;
