pub mod codec;
pub mod pipeconf;
pub mod pure;
pub mod session;
pub mod transport;
