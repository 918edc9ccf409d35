//! Network state store.
//!
//! Users and channels as this server currently believes them to be,
//! whether connected here or learned over a link.

mod channel;
mod matrix;
mod observer;
mod uid;
mod user;

pub use channel::{Channel, ListEntry, ListKind, Privilege, Topic};
pub use matrix::{InsertError, JoinOutcome, Matrix, RenameError, ServerIdentity};
pub use observer::{MessageKind, NetworkObserver, NullObserver};
pub use uid::UidGenerator;
pub use user::{Uid, User};
