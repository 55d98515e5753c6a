pub use client::*;
pub use doctor::*;
pub use evaluate::*;
pub use inspect::*;
pub use server::*;
pub use setup::*;

pub mod client;
pub mod doctor;
pub mod evaluate;
pub mod inspect;
pub mod server;
pub mod setup;

pub mod packet;
