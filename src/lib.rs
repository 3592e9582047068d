//! Read weight and battery level from Acaia Lunar coffee scales over Bluetooth Low Energy, and
//! send tare and timer commands.
//!
//! The scale exposes a single GATT characteristic. Notifications on it carry a proprietary
//! framed protocol which [`FrameDecoder`] reassembles and decodes. Commands are written to the
//! same characteristic. After connecting, the scale needs a short handshake and then a heartbeat
//! every couple of seconds or it drops the connection; [`ScaleSession`] takes care of both.
//!
//! Currently the following can be accessed:
//!
//! - Weight (g)
//! - Battery level (%)
//! - Tare
//! - Timer start, stop and reset
//!
//! # Example
//!
//! ```no_run
//! # use lunarread::{BluestTransport, ScaleConfig, ScaleEvent, ScaleSession};
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let config = ScaleConfig::default();
//!     let transport = BluestTransport::new(&config).await;
//!     let (session, mut events) = ScaleSession::new(transport, config);
//!     session.connect().await.unwrap();
//!     while let Some(event) = events.recv().await {
//!         if let ScaleEvent::Weight(Some(weight)) = event {
//!             println!("{weight} g");
//!         }
//!     }
//! # }
//! ```

mod config;
mod decoder;
mod error;
mod event;
mod packet;
mod session;
mod timer;
pub mod transport;

pub use config::{DeviceFilter, ScaleConfig};
pub use decoder::{FrameDecoder, Reading};
pub use error::SessionError;
pub use event::{ScaleEvent, SessionState, Status};
pub use packet::{encode_frame, encode_packet, to_hex, Command, HEADER};
pub use session::ScaleSession;
pub use transport::BluestTransport;
