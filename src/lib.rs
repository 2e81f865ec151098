#![doc = include_str!("../README.md")]

mod codec;
mod config;
mod error;
mod extractor;
mod filter;
mod map;
mod processor;
mod requests;
pub mod service;
mod session;

pub use codec::{CborCodec, Codec, JsonCodec};
pub use config::{SessionConfig, SessionConfigBuilder, TlsOptions};
pub use error::{Error, Result};
pub use extractor::Extractor;
pub use filter::{event_mask, Filter};
pub use map::{ListenerBuilder, MapEvent, MapLifecycleEvent, MapListener, NamedMap};
pub use processor::{Comparator, Processor};
pub use service::events::MapEventKind;
pub use session::{Session, SessionEvent};
