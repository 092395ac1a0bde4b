//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Engine.IO frame: one type digit then payload (`0` open, `1` close, `2` ping, `3` pong,
//! `4` message, `5` upgrade, `6` noop). A Socket.IO packet rides inside a `4` message:
//! `<type>[<namespace>,][<ack id>][<json>]`. Binary packets are not used by this service.

use serde::Deserialize;
use serde_json::Value;

/// Default namespace; omitted on the wire.
pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),
    #[error("invalid packet json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        let rest = chars.as_str();
        Ok(match kind {
            '0' => EnginePacket::Open(serde_json::from_str(rest)?),
            '1' => EnginePacket::Close,
            '2' => EnginePacket::Ping(rest.to_string()),
            '3' => EnginePacket::Pong(rest.to_string()),
            '4' => EnginePacket::Message(rest.to_string()),
            '5' => EnginePacket::Upgrade,
            '6' => EnginePacket::Noop,
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            // Server-side frame; the client only decodes it.
            EnginePacket::Open(h) => format!(
                "0{}",
                serde_json::json!({
                    "sid": h.sid,
                    "upgrades": h.upgrades,
                    "pingInterval": h.ping_interval,
                    "pingTimeout": h.ping_timeout,
                })
            ),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(p) => format!("2{}", p),
            EnginePacket::Pong(p) => format!("3{}", p),
            EnginePacket::Message(m) => format!("4{}", m),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<Value>,
    },
    Disconnect {
        namespace: String,
    },
    /// `data` is the JSON array `["event", arg...]`.
    Event {
        namespace: String,
        ack_id: Option<u64>,
        data: Value,
    },
    Ack {
        namespace: String,
        ack_id: u64,
        data: Value,
    },
    ConnectError {
        namespace: String,
        data: Option<Value>,
    },
}

impl SocketPacket {
    /// Event on the default namespace with no ack.
    pub fn event(data: Value) -> Self {
        SocketPacket::Event {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ack_id: None,
            data,
        }
    }

    pub fn connect() -> Self {
        SocketPacket::Connect {
            namespace: DEFAULT_NAMESPACE.to_string(),
            data: None,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::Ack { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace,
        }
    }

    pub fn decode(text: &str) -> Result<Self, PacketError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(PacketError::Empty)?;
        if kind == '5' || kind == '6' {
            return Err(PacketError::Unsupported("binary packets"));
        }
        let mut rest = chars.as_str();

        let namespace = if rest.starts_with('/') {
            match rest.find(',') {
                Some(i) => {
                    let ns = &rest[..i];
                    rest = &rest[i + 1..];
                    ns.to_string()
                }
                None => {
                    let ns = rest;
                    rest = "";
                    ns.to_string()
                }
            }
        } else {
            DEFAULT_NAMESPACE.to_string()
        };

        let digits = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            rest[..digits].parse::<u64>().ok()
        } else {
            None
        };
        rest = &rest[digits..];

        let data: Option<Value> = if rest.is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(match kind {
            '0' => SocketPacket::Connect { namespace, data },
            '1' => SocketPacket::Disconnect { namespace },
            '2' => SocketPacket::Event {
                namespace,
                ack_id,
                data: data.unwrap_or(Value::Null),
            },
            '3' => SocketPacket::Ack {
                namespace,
                ack_id: ack_id.ok_or(PacketError::Unsupported("ack without id"))?,
                data: data.unwrap_or(Value::Null),
            },
            '4' => SocketPacket::ConnectError { namespace, data },
            other => return Err(PacketError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        let (kind, ack, data) = match self {
            SocketPacket::Connect { data, .. } => ('0', None, data.as_ref()),
            SocketPacket::Disconnect { .. } => ('1', None, None),
            SocketPacket::Event { ack_id, data, .. } => ('2', *ack_id, Some(data)),
            SocketPacket::Ack { ack_id, data, .. } => ('3', Some(*ack_id), Some(data)),
            SocketPacket::ConnectError { data, .. } => ('4', None, data.as_ref()),
        };
        let mut out = String::new();
        out.push(kind);
        let ns = self.namespace();
        if ns != DEFAULT_NAMESPACE {
            out.push_str(ns);
            out.push(',');
        }
        if let Some(id) = ack {
            out.push_str(&id.to_string());
        }
        if let Some(d) = data {
            out.push_str(&d.to_string());
        }
        out
    }

    /// Wrap in an Engine.IO message frame.
    pub fn to_engine_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}
