use super::Identifier;
use crate::protocol::types::ConnectionType;

const HEADER: &str = "MCPE";
const SEPARATOR: &str = ";";

/// The `;`-joined identifier format used by Minecraft Bedrock servers:
/// `MCPE;name;protocol;version;online;max;guid;world;gamemode`.
#[derive(Debug, Clone)]
pub struct MinecraftIdentifier {
    pub server_name: String,
    pub server_protocol: u32,
    pub version_tag: String,
    pub online_player_count: u32,
    pub max_player_count: u32,
    pub guid: i64,
    pub world_name: String,
    pub gamemode: String,
    /// Legacy identifiers truncate after the max player count.
    pub legacy: bool,
    pub connection: ConnectionType,
}

impl Default for MinecraftIdentifier {
    fn default() -> Self {
        Self {
            server_name: "A rakkit server".into(),
            server_protocol: 622,
            version_tag: "1.20.40".into(),
            online_player_count: 0,
            max_player_count: 10,
            guid: 0,
            world_name: "world".into(),
            gamemode: "Survival".into(),
            legacy: false,
            connection: ConnectionType::vanilla(),
        }
    }
}

impl Identifier for MinecraftIdentifier {
    fn build(&self) -> String {
        let mut parts = vec![
            HEADER.to_string(),
            self.server_name.clone(),
            self.server_protocol.to_string(),
            self.version_tag.clone(),
            self.online_player_count.to_string(),
            self.max_player_count.to_string(),
        ];

        if !self.legacy {
            parts.push(self.guid.to_string());
            parts.push(self.world_name.clone());
            parts.push(self.gamemode.clone());
        }

        parts.join(SEPARATOR)
    }

    fn connection_type(&self) -> ConnectionType {
        self.connection.clone()
    }
}
