pub mod depth;
pub mod orders;
