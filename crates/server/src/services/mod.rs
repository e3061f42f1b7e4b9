//! Business logic, one service per resource. Handlers stay thin: they
//! parse the request, call a service, and format the response.

pub mod auth;
pub mod chunk;
pub mod collection;
pub mod invitation;
pub mod item;
pub mod member;

pub use auth::AuthService;
pub use chunk::ChunkService;
pub use collection::CollectionService;
pub use invitation::InvitationService;
pub use item::ItemService;
pub use member::MemberService;

use crate::error::{Error, Result};

/// UIDs end up in URLs and content-store paths, so only the base64url-like
/// alphabet is accepted.
pub(crate) fn validate_uid(field: &'static str, uid: &str) -> Result<()> {
    let ok = !uid.is_empty()
        && uid
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::Validation {
            field,
            detail: format!("Invalid uid \"{uid}\""),
        })
    }
}
