//! Enumeration types shared by the engine and its clients.
//!
//! Every enum serializes to the `SCREAMING_SNAKE_CASE` string used on the
//! wire and in snapshots.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Action result codes
// ---------------------------------------------------------------------------

/// Failure codes carried on `ACTION_RESULT` and `TASK_FAIL` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or missing request fields.
    #[serde(rename = "E_BAD_REQUEST")]
    BadRequest,
    /// The referenced entity, position, or catalog entry does not exist.
    #[serde(rename = "E_INVALID_TARGET")]
    InvalidTarget,
    /// The actor lacks the right to perform the action here.
    #[serde(rename = "E_NO_PERMISSION")]
    NoPermission,
    /// The actor lacks the items or stamina the action needs.
    #[serde(rename = "E_NO_RESOURCE")]
    NoResource,
    /// Slot occupied, overlap, or already in the requested state.
    #[serde(rename = "E_CONFLICT")]
    Conflict,
    /// Rate limit exceeded.
    #[serde(rename = "E_RATE_LIMIT")]
    RateLimit,
    /// A physical or temporal precondition is not met.
    #[serde(rename = "E_BLOCKED")]
    Blocked,
    /// The act tick is outside the accepted window.
    #[serde(rename = "E_STALE")]
    Stale,
    /// Anything else. Unknown codes are rewritten to this.
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    /// All known codes.
    pub const ALL: [Self; 9] = [
        Self::BadRequest,
        Self::InvalidTarget,
        Self::NoPermission,
        Self::NoResource,
        Self::Conflict,
        Self::RateLimit,
        Self::Blocked,
        Self::Stale,
        Self::Internal,
    ];

    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "E_BAD_REQUEST",
            Self::InvalidTarget => "E_INVALID_TARGET",
            Self::NoPermission => "E_NO_PERMISSION",
            Self::NoResource => "E_NO_RESOURCE",
            Self::Conflict => "E_CONFLICT",
            Self::RateLimit => "E_RATE_LIMIT",
            Self::Blocked => "E_BLOCKED",
            Self::Stale => "E_STALE",
            Self::Internal => "E_INTERNAL",
        }
    }

    /// Parse a wire code, mapping anything unknown to [`ErrorCode::Internal`].
    pub fn sanitize(code: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == code)
            .unwrap_or(Self::Internal)
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Global weather state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weather {
    /// No effect.
    #[default]
    Clear,
    /// Movement proceeds on even ticks only.
    Storm,
    /// Hunger drains twice as fast.
    Cold,
}

impl Weather {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Storm => "STORM",
            Self::Cold => "COLD",
        }
    }
}

/// Surface biome, selected per 64-cell region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Biome {
    /// Dirt and stone fields.
    Plains,
    /// Log clusters.
    Forest,
    /// Sand dunes.
    Desert,
}

impl Biome {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plains => "PLAINS",
            Self::Forest => "FOREST",
            Self::Desert => "DESERT",
        }
    }
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

/// Organization kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgKind {
    /// Craft or trade guild.
    #[default]
    Guild,
    /// Settlement; its land cores refuse wanted agents.
    City,
}

impl OrgKind {
    /// Parse a case-insensitive kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GUILD" => Some(Self::Guild),
            "CITY" => Some(Self::City),
            _ => None,
        }
    }

    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Guild => "GUILD",
            Self::City => "CITY",
        }
    }
}

/// Role of a member within an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    /// Full control; at most one per org.
    Leader,
    /// May withdraw from the treasury and administer org land.
    Officer,
    /// Ordinary member.
    #[default]
    Member,
}

impl OrgRole {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "LEADER",
            Self::Officer => "OFFICER",
            Self::Member => "MEMBER",
        }
    }

    /// Whether this role may administer org assets.
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Leader | Self::Officer)
    }
}

/// Kind of land claim, which selects the default visitor flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimType {
    /// Plain claim; visitors may do nothing.
    #[default]
    Default,
    /// Private homestead; visitors may do nothing.
    Homestead,
    /// City core; visitors may trade.
    CityCore,
}

impl ClaimType {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Homestead => "HOMESTEAD",
            Self::CityCore => "CITY_CORE",
        }
    }
}

/// Lifecycle state of a law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LawStatus {
    /// Announced; voting has not opened.
    Notice,
    /// Members may vote.
    Voting,
    /// Effects written onto the land.
    Active,
    /// Vote failed or activation failed.
    Rejected,
}

impl LawStatus {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Notice => "NOTICE",
            Self::Voting => "VOTING",
            Self::Active => "ACTIVE",
            Self::Rejected => "REJECTED",
        }
    }
}

/// A ballot choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    /// In favour.
    Yes,
    /// Against.
    No,
    /// Counted as neither.
    Abstain,
}

impl VoteChoice {
    /// Parse the permissive ballot spellings (`Y`, `1`, `TRUE`, ...).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" | "Y" | "1" | "TRUE" => Some(Self::Yes),
            "NO" | "N" | "0" | "FALSE" => Some(Self::No),
            "ABSTAIN" => Some(Self::Abstain),
            _ => None,
        }
    }

    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "YES",
            Self::No => "NO",
            Self::Abstain => "ABSTAIN",
        }
    }
}

// ---------------------------------------------------------------------------
// Economy
// ---------------------------------------------------------------------------

/// What a contract asks of its acceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractKind {
    /// Bring raw materials to the terminal.
    Gather,
    /// Bring finished goods to the terminal.
    Deliver,
    /// Build a blueprint at an anchor.
    Build,
}

impl ContractKind {
    /// Parse a case-insensitive kind name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GATHER" => Some(Self::Gather),
            "DELIVER" => Some(Self::Deliver),
            "BUILD" => Some(Self::Build),
            _ => None,
        }
    }

    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "GATHER",
            Self::Deliver => "DELIVER",
            Self::Build => "BUILD",
        }
    }
}

/// Contract lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractState {
    /// Waiting for an acceptor.
    Open,
    /// Taken by an acceptor.
    Accepted,
    /// Paid out.
    Completed,
    /// Expired before anyone accepted it.
    Canceled,
    /// Expired while accepted.
    Failed,
}

impl ContractState {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }
}

// ---------------------------------------------------------------------------
// Fun scoring
// ---------------------------------------------------------------------------

/// The six fun dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunDim {
    /// First visits and first crafts.
    Novelty,
    /// Finished structures.
    Creation,
    /// Trades and contracts.
    Social,
    /// Laws and public works.
    Influence,
    /// World-event participation.
    Narrative,
    /// Surviving hazards.
    RiskRescue,
}

impl FunDim {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Novelty => "NOVELTY",
            Self::Creation => "CREATION",
            Self::Social => "SOCIAL",
            Self::Influence => "INFLUENCE",
            Self::Narrative => "NARRATIVE",
            Self::RiskRescue => "RISK_RESCUE",
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Kind of movement task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MoveKind {
    /// Walk to a fixed target.
    MoveTo,
    /// Keep within range of a moving target.
    Follow,
}

impl MoveKind {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MoveTo => "MOVE_TO",
            Self::Follow => "FOLLOW",
        }
    }
}

/// Kind of work task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkKind {
    /// Break a block.
    Mine,
    /// Pick up a dropped stack.
    Gather,
    /// Place a block from inventory.
    Place,
    /// Inspect a container, board, or sign.
    Open,
    /// Move items between self and containers.
    Transfer,
    /// Run a station recipe.
    Craft,
    /// Run a furnace recipe.
    Smelt,
    /// Place a blueprint block by block.
    BuildBlueprint,
}

impl WorkKind {
    /// Wire representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mine => "MINE",
            Self::Gather => "GATHER",
            Self::Place => "PLACE",
            Self::Open => "OPEN",
            Self::Transfer => "TRANSFER",
            Self::Craft => "CRAFT",
            Self::Smelt => "SMELT",
            Self::BuildBlueprint => "BUILD_BLUEPRINT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codes_sanitize_to_internal() {
        assert_eq!(ErrorCode::sanitize("E_CONFLICT"), ErrorCode::Conflict);
        assert_eq!(ErrorCode::sanitize("E_WHATEVER"), ErrorCode::Internal);
        assert_eq!(ErrorCode::sanitize(""), ErrorCode::Internal);
    }

    #[test]
    fn codes_serialize_to_wire_strings() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_string(&code).unwrap_or_default();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn vote_choice_accepts_aliases() {
        assert_eq!(VoteChoice::parse("y"), Some(VoteChoice::Yes));
        assert_eq!(VoteChoice::parse("0"), Some(VoteChoice::No));
        assert_eq!(VoteChoice::parse(" abstain "), Some(VoteChoice::Abstain));
        assert_eq!(VoteChoice::parse("maybe"), None);
    }

    #[test]
    fn claim_type_wire_names() {
        let json = serde_json::to_string(&ClaimType::CityCore).unwrap_or_default();
        assert_eq!(json, "\"CITY_CORE\"");
    }
}
