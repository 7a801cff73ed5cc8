//! WebSocket frame model.
//!
//! # Responsibilities
//! - Name the opcodes handlers can push
//! - Carry one inbound message unit to `on_message`
//!
//! # Design Decisions
//! - Frames are whole messages; fragmentation is left to the engine
//! - Opcode numbers follow RFC 6455

use std::fmt;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes};
use serde::{Deserialize, Serialize};

use crate::net::ConnectionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Text = 1,
    Binary = 2,
    Close = 8,
    Ping = 9,
    Pong = 10,
}

impl Opcode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Text),
            2 => Some(Self::Binary),
            8 => Some(Self::Close),
            9 => Some(Self::Ping),
            10 => Some(Self::Pong),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

/// A single WebSocket message delivered to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub conn_id: ConnectionId,
    pub opcode: Opcode,
    pub data: Bytes,
    pub finish: bool,
}

impl Frame {
    pub fn new(conn_id: ConnectionId, opcode: Opcode, data: impl Into<Bytes>) -> Self {
        Self {
            conn_id,
            opcode,
            data: data.into(),
            finish: true,
        }
    }

    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Build from an axum message. Close frames keep only their reason text.
    pub fn from_message(conn_id: ConnectionId, message: Message) -> Self {
        match message {
            Message::Text(text) => Self::new(conn_id, Opcode::Text, Bytes::from(text.as_str().to_owned())),
            Message::Binary(data) => Self::new(conn_id, Opcode::Binary, data),
            Message::Ping(data) => Self::new(conn_id, Opcode::Ping, data),
            Message::Pong(data) => Self::new(conn_id, Opcode::Pong, data),
            Message::Close(frame) => Self::new(
                conn_id,
                Opcode::Close,
                frame
                    .map(|f| Bytes::from(f.reason.as_str().to_owned()))
                    .unwrap_or_default(),
            ),
        }
    }

    /// Convert into an axum message, or `None` for non-UTF-8 text.
    pub fn into_message(self) -> Option<Message> {
        Some(match self.opcode {
            Opcode::Text => {
                let text = String::from_utf8(self.data.to_vec()).ok()?;
                Message::Text(Utf8Bytes::from(text))
            }
            Opcode::Binary => Message::Binary(self.data),
            Opcode::Ping => Message::Ping(self.data),
            Opcode::Pong => Message::Pong(self.data),
            Opcode::Close => Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: Utf8Bytes::from(String::from_utf8_lossy(&self.data).into_owned()),
            })),
        })
    }
}
