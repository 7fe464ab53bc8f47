//! Controller side library for talking to hanbus nodes
//!
//! The [`Controller`] sends requests over any byte link implementing
//! [`AsyncByteSender`](common::traits::AsyncByteSender) and
//! [`AsyncByteReceiver`](common::traits::AsyncByteReceiver), waits for the addressed node to
//! answer, and collects the unsolicited notifications nodes raise at boot or when enumerated.
#![warn(missing_docs, missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod controller;

pub use controller::{
    scaled_value, ClientError, CommStatus, Controller, NodeIdentity, Notification, Response,
    ShuntSetting,
};
pub use hanbus_common as common;
