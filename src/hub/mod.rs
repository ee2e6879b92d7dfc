pub mod models;
pub use models::*;

mod broadcaster;
pub use broadcaster::*;
