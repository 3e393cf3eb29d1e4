//! HTTP acquisition engine.
//!
//! Logs into the booking site, polls its two schedule channels for open
//! slots and claims one. Every component talks to the site through a shared
//! [`http_client::HttpGateway`].

pub mod booking;
pub mod cipher;
pub mod engine;
pub mod http_client;
pub mod markup;
pub mod proxy;
pub mod schedule;
pub mod session;
pub mod site;
pub mod slot;
