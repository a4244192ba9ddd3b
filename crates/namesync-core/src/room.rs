//! Room codes and share links
//!
//! A room is the broadcast channel two partners share. It is identified by a
//! short code drawn from a restricted alphabet so it can be read aloud, typed
//! on a phone, or embedded in a link:
//!
//! ```text
//! code:   k3v9qa
//! topic:  namesync-k3v9qa
//! link:   https://namesync.app/?room=k3v9qa
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Number of characters in a room code
pub const ROOM_CODE_LEN: usize = 6;

/// Characters a room code may contain
pub const ROOM_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Query parameter carrying the room code in a share link
const SHARE_PARAM: &str = "room";

/// Validated room identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random room code
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse user input into a room code.
    ///
    /// Surrounding whitespace is ignored and letters are lowercased.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRoomCode` if the input has the wrong length
    /// or contains characters outside `[a-z0-9]`.
    pub fn parse(input: &str) -> Result<Self, SyncError> {
        let candidate = input.trim().to_ascii_lowercase();
        if Self::is_valid(&candidate) {
            Ok(Self(candidate))
        } else {
            Err(SyncError::InvalidRoomCode(input.to_string()))
        }
    }

    /// Check a string against the fixed room code format without normalising it
    pub fn is_valid(s: &str) -> bool {
        s.len() == ROOM_CODE_LEN && s.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
    }

    /// Extract a room code from a share link, or accept a bare code.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidRoomCode` if the link has no `room`
    /// parameter or the parameter is not a valid code.
    pub fn from_share_link(link: &str) -> Result<Self, SyncError> {
        let link = link.trim();
        let Some((_, query)) = link.split_once('?') else {
            return Self::parse(link);
        };
        let query = query.split('#').next().unwrap_or_default();

        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == SHARE_PARAM)
            .map(|(_, value)| Self::parse(value))
            .unwrap_or_else(|| {
                Err(SyncError::InvalidRoomCode(format!(
                    "no '{}' parameter in link: {}",
                    SHARE_PARAM, link
                )))
            })
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relay topic carrying this room's messages
    pub fn topic(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    /// Share link embedding this code as a query parameter
    pub fn share_link(&self, base_url: &str) -> String {
        let separator = if base_url.contains('?') { '&' } else { '?' };
        format!("{}{}{}={}", base_url, separator, SHARE_PARAM, self.0)
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = SyncError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_valid() {
        for _ in 0..100 {
            let code = RoomCode::generate();
            assert!(RoomCode::is_valid(code.as_str()), "bad code {}", code);
        }
    }

    #[test]
    fn test_generate_is_random() {
        let a = RoomCode::generate();
        let b = RoomCode::generate();
        let c = RoomCode::generate();
        assert!(a != b || b != c);
    }

    #[test]
    fn test_parse_normalises() {
        let code = RoomCode::parse("  K3V9QA \n").unwrap();
        assert_eq!(code.as_str(), "k3v9qa");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for bad in ["", "abc", "abcdefg", "abc-12", "abç123", "ab 123"] {
            let err = RoomCode::parse(bad).unwrap_err();
            assert!(matches!(err, SyncError::InvalidRoomCode(_)), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_topic() {
        let code = RoomCode::parse("k3v9qa").unwrap();
        assert_eq!(code.topic("namesync-"), "namesync-k3v9qa");
    }

    #[test]
    fn test_share_link() {
        let code = RoomCode::parse("k3v9qa").unwrap();
        assert_eq!(
            code.share_link("https://namesync.app/"),
            "https://namesync.app/?room=k3v9qa"
        );
        assert_eq!(
            code.share_link("https://namesync.app/?lang=en"),
            "https://namesync.app/?lang=en&room=k3v9qa"
        );
    }

    #[test]
    fn test_from_share_link() {
        let code = RoomCode::from_share_link("https://namesync.app/?lang=en&room=K3V9QA#top").unwrap();
        assert_eq!(code.as_str(), "k3v9qa");

        let bare = RoomCode::from_share_link("k3v9qa").unwrap();
        assert_eq!(bare, code);
    }

    #[test]
    fn test_from_share_link_missing_param() {
        let err = RoomCode::from_share_link("https://namesync.app/?lang=en").unwrap_err();
        assert!(matches!(err, SyncError::InvalidRoomCode(_)));

        let err = RoomCode::from_share_link("https://namesync.app/?room=nope").unwrap_err();
        assert!(matches!(err, SyncError::InvalidRoomCode(_)));
    }

    #[test]
    fn test_serde_validates() {
        let code: RoomCode = serde_json::from_str("\"abc123\"").unwrap();
        assert_eq!(code.as_str(), "abc123");
        assert!(serde_json::from_str::<RoomCode>("\"bad\"").is_err());
    }
}
