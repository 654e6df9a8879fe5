//! Display identities of collaborators.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// CSS colour used for this user's cursor and selection
    pub color: String,
}

impl Identity {
    /// Identity with the colour derived from the user ID.
    pub fn new(user_id: impl Into<String>, name: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            color: user_color(&user_id),
            user_id,
            name: name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }
}

/// Stable colour for a user: the 32-bit `hash * 31 + c` string hash mapped
/// onto the hue wheel.
pub fn user_color(user_id: &str) -> String {
    let mut hash: i32 = 0;
    for unit in user_id.encode_utf16() {
        hash = i32::from(unit).wrapping_add(hash.wrapping_shl(5).wrapping_sub(hash));
    }
    let hue = (hash % 360).unsigned_abs();
    format!("hsl({}, 70%, 50%)", hue)
}

/// Identities whose name contains `query`, ignoring case.
pub fn filter_mentions<'a>(identities: &'a [Identity], query: &str) -> Vec<&'a Identity> {
    let query = query.to_lowercase();
    identities
        .iter()
        .filter(|identity| identity.name.to_lowercase().contains(&query))
        .collect()
}
