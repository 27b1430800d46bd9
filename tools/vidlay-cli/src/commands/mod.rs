pub mod check;
pub mod health;
pub mod render;
pub mod status;
pub mod validate;
