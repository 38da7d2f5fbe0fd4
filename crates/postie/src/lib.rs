//! Letter exchange over stream connections.
//!
//! A [`Postman`] binds one duplex byte stream and exchanges typed letters with
//! the peer: outbound letters are framed by a [`Serializer`] and written in
//! send order; inbound frames are decoded and handed to every registered
//! [`Recipient`] under the chosen [`Delivery`] strategy. Stopping runs a
//! two-sided handshake so letters sent before the stop are never lost.
//!
//! An [`Office`] accepts connections from a [`Listener`] and starts one
//! postman per connection, each replicated from a configured blueprint.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use postie::{Delivery, Mailbox, Postman, TextSerializer};
//!
//! # async fn demo() -> postie::Result<()> {
//! let stream = tokio::net::TcpStream::connect("127.0.0.1:7878").await?;
//! let postman = Postman::<i64>::new(Delivery::Sequential);
//! let mailbox = Arc::new(Mailbox::new());
//! postman.register(Arc::clone(&mailbox));
//! postman.use_serializer(TextSerializer::new())?;
//! postman.bind(stream)?;
//! postman.start()?;
//!
//! postman.send(42)?;
//! let reply = mailbox.receive().await;
//! postman.stop().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod config;
mod delivery;
mod error;
mod mailbox;
mod office;
mod postman;
mod recipient;
mod spawn;
mod transport;

pub use config::{DecodePolicy, PostmanConfig};
pub use delivery::Delivery;
pub use error::{Error, Result};
pub use mailbox::Mailbox;
pub use office::Office;
pub use postie_wire::{Framing, JsonSerializer, Matcher, Serializer, TextSerializer};
pub use postman::{Postman, PostmanId};
pub use recipient::Recipient;
pub use transport::{Connection, Listener};
