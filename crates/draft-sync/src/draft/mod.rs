pub mod pick;
pub mod teams;
