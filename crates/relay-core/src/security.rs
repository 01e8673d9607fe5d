use crate::domain::UserId;

// ============== Authorization ==============

/// An empty allow-list lets every user through; otherwise the user must be listed.
/// Updates without a sender are always rejected.
pub fn is_authorized(user_id: Option<UserId>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    allowed_users.is_empty() || allowed_users.contains(&user_id.0)
}
