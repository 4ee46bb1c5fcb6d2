//! Session lifecycle and message dispatch for Signal-style end-to-end encryption.
//!
//! An [`Account`] owns a [`SignalStore`], a [`CryptoEngine`] and a job queue.
//! [`Account::session`] hands out a [`SessionProtocol`] per remote
//! [`ProtocolAddress`], which creates sessions from published
//! [`PreKeyBundle`]s and encrypts or decrypts messages on them.

mod address;
pub use address::ProtocolAddress;

mod bundle;
pub use bundle::*;

mod builder;
pub use builder::SessionBuilder;

mod cipher;
pub use cipher::SessionCipher;

mod config;
pub use config::EngineConfig;

mod encoding;

mod engine;
pub use engine::*;

mod error;
pub use error::Error;

pub mod fingerprint;

pub mod keys;

mod message;
pub use message::{Envelope, MessageType};

mod proto;

mod protocol;
pub use protocol::*;

mod queue;
pub use queue::{JobHandle, JobQueue};

mod record;
pub use record::{PendingPreKey, SessionRecord, SessionState};

mod store;
pub use store::*;
