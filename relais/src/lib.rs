mod executor;

pub mod acceptor;
pub mod buffer;
pub mod reactor;
pub mod sender;
pub mod server;
pub mod stats;
pub mod traffic;
pub mod transfer;
pub mod tunnel;

pub use reactor::handler::{
    AcceptHandler, ConnectHandler, ReadHandler, SocketHandler, WriteHandler,
};
pub use reactor::{Reactor, ReactorBuilder};
