//! intel-hub - watches external sources and notifies subscribers about changes.
//!
//! Each source kind (Bilibili live rooms, YouTube channels, X posts, RSS/Atom
//! feeds, GitHub releases, wallet balances) is a [`source::SourceConnector`].
//! A [`connector::Connector`] polls the distinct subscribed targets of one
//! kind on its own [`task::Scheduler`], compares what it sees with each
//! subscription's fingerprint and hands changes to a
//! [`dispatcher::Dispatcher`], which delivers one message per subscriber
//! through a [`messenger::Messenger`].

pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod logging;
pub mod messenger;
pub mod registry;
pub mod repository;
pub mod source;
pub mod task;
