//! This crate provides the consumer side of a message-queue client: a uniform view over transport
//! messages and the delivery adapter a transport invokes for every message on a subscription.
//! Connections, sessions, acknowledgement and destination administration belong to the transport.
pub mod dispatch;
pub mod error;
pub mod header;
pub mod listener;
pub mod message;
pub mod property;
pub mod statistics;
pub mod time;
pub mod view;
