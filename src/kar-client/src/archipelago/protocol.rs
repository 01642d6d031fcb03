//! Archipelago network packets
//!
//! Packets travel as JSON arrays of objects tagged by `cmd`. Only the
//! commands this client sends or reacts to are modelled; anything else
//! decodes as [`ServerPacket::Unknown`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub const GAME_NAME: &str = "Kirby Air Ride";
pub const DEATH_LINK_TAG: &str = "DeathLink";
/// Send own items, remote items and the starting inventory
pub const ITEMS_HANDLING_ALL: u8 = 0b111;
/// `ClientStatus.CLIENT_GOAL`
pub const CLIENT_GOAL: u8 = 30;
/// Data storage key mirroring the applied-items watermark
pub const WATERMARK_KEY: &str = "kar_last_received_index";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    #[serde(default = "version_class")]
    pub class: VersionClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionClass {
    Version,
}

fn version_class() -> VersionClass {
    VersionClass::Version
}

impl NetworkVersion {
    pub const CLIENT: NetworkVersion = NetworkVersion {
        major: 0,
        minor: 5,
        build: 1,
        class: VersionClass::Version,
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStorageOperation {
    pub operation: String,
    pub value: Value,
}

/// Client to server
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cmd")]
pub enum ClientPacket {
    Connect {
        password: String,
        game: String,
        name: String,
        uuid: String,
        version: NetworkVersion,
        items_handling: u8,
        tags: Vec<String>,
        slot_data: bool,
    },
    LocationChecks {
        locations: Vec<i64>,
    },
    Bounce {
        tags: Vec<String>,
        data: Value,
    },
    StatusUpdate {
        status: u8,
    },
    Set {
        key: String,
        default: Value,
        want_reply: bool,
        operations: Vec<DataStorageOperation>,
    },
    ConnectUpdate {
        items_handling: u8,
        tags: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NetworkItem {
    pub item: i64,
    pub location: i64,
    pub player: i64,
    #[serde(default)]
    pub flags: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JsonMessagePart {
    #[serde(default)]
    pub text: Option<String>,
}

/// Server to client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd")]
pub enum ServerPacket {
    RoomInfo {
        #[serde(default)]
        seed_name: Option<String>,
        #[serde(default)]
        password: bool,
    },
    Connected {
        team: i64,
        slot: i64,
        #[serde(default)]
        checked_locations: Vec<i64>,
        #[serde(default)]
        slot_data: Value,
    },
    ConnectionRefused {
        #[serde(default)]
        errors: Vec<String>,
    },
    ReceivedItems {
        index: u64,
        items: Vec<NetworkItem>,
    },
    Bounced {
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        data: Value,
    },
    #[serde(rename = "PrintJSON")]
    PrintJson {
        #[serde(default)]
        data: Vec<JsonMessagePart>,
    },
    #[serde(other)]
    Unknown,
}

impl ServerPacket {
    /// Plain text of a `PrintJSON` message
    pub fn text(&self) -> Option<String> {
        match self {
            ServerPacket::PrintJson { data } => Some(
                data.iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<String>(),
            ),
            _ => None,
        }
    }
}

/// Decode one WebSocket frame; malformed packets are skipped
pub fn decode(frame: &str) -> Result<Vec<ServerPacket>, serde_json::Error> {
    let raw: Vec<Value> = serde_json::from_str(frame)?;
    let mut packets = Vec::with_capacity(raw.len());
    for value in raw {
        let cmd = value
            .get("cmd")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string();
        match serde_json::from_value(value) {
            Ok(packet) => packets.push(packet),
            Err(err) => warn!(%cmd, error = %err, "skipping malformed packet"),
        }
    }
    Ok(packets)
}

pub fn encode(packets: &[ClientPacket]) -> Result<String, serde_json::Error> {
    serde_json::to_string(packets)
}
