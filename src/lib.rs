//! Last-competitor-standing contest: one arbiter referees any number of
//! shooters over a publish/subscribe bus.

pub mod arbiter;
pub mod bus;
pub mod config;
pub mod event;
pub mod logging;
pub mod retry;
pub mod roster;
pub mod shooter;
pub mod shutdown;
