//! Email delivery.

pub mod sender;

pub use sender::{
    DisabledEmailSender, EmailFuture, EmailMessage, EmailResult, EmailSender, HttpEmailSender,
    sender_from_config,
};
