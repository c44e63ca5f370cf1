pub mod render;
pub mod run;
pub mod validate;
