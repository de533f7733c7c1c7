//! Persistent mailstore: mailbox accounts, folders, messages, and the
//! outbound send-queue fields folded into the message row.

pub mod model;
pub mod store;

pub use model::{
    ChangeEvent, ChangeKind, FolderMeta, Flags, IncomingArchive, MailboxStatus, Message,
    NewMessage, QueueStatus, SendAttempt,
};
pub use store::Mailstore;
