//! Time-sortable prefixed identifiers
//!
//! All IDs use the format `{prefix}_{uuidv7-hex}`, e.g.
//! `tm_01934f2e8a137d9a8b3c4e5f6a7b8c9d`. UUIDv7 encodes the creation time
//! in its leading bits, so within a prefix the lexicographic order of IDs
//! equals their temporal order. IDs generated in the same process never
//! collide (v7 carries a monotonic counter plus per-ID entropy).

use std::fmt;

/// The entity families that get their own ID prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// Temporal message (`tm`)
    Message,
    /// Distillation (`ds`)
    Distillation,
    /// Background task (`tk`)
    Task,
    /// Worker record (`wk`)
    Worker,
    /// LTM entry (`en`)
    Entry,
}

impl IdKind {
    /// The two-letter prefix for this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::Message => "tm",
            IdKind::Distillation => "ds",
            IdKind::Task => "tk",
            IdKind::Worker => "wk",
            IdKind::Entry => "en",
        }
    }

    /// Resolve a prefix back to its kind
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "tm" => Some(IdKind::Message),
            "ds" => Some(IdKind::Distillation),
            "tk" => Some(IdKind::Task),
            "wk" => Some(IdKind::Worker),
            "en" => Some(IdKind::Entry),
            _ => None,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Generate a new time-sortable ID for the given kind
pub fn new_id(kind: IdKind) -> String {
    format!("{}_{}", kind.prefix(), uuid::Uuid::now_v7().simple())
}

/// Parse the kind out of an ID string
pub fn parse_kind(id: &str) -> Option<IdKind> {
    id.split_once('_').and_then(|(prefix, _)| IdKind::from_prefix(prefix))
}
