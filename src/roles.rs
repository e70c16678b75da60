//! Respondent classification.
//!
//! Every report that splits feedback by role goes through [`classify_for`], so
//! the same respondent always lands in the same column. The precedence below
//! is a business rule and must stay in this order:
//!
//! 1. username pattern (`E<digit>`/`ST…` student, `S<digit>`/`SF…`/`*staff*` staff)
//! 2. explicit role tags (`staff` before `student`)
//! 3. a staff search with a known department counts the respondent as staff
//! 4. anything else is `other`

use crate::models::{RespondentProfile, RoleCategory};

pub fn classify(profile: &RespondentProfile) -> RoleCategory {
    classify_for(profile, None)
}

/// Classifies a respondent, optionally in the context of a search for one
/// particular role. Total: never fails, falls through to `Other`.
pub fn classify_for(profile: &RespondentProfile, searching_for: Option<RoleCategory>) -> RoleCategory {
    if let Some(role) = classify_username(&profile.username) {
        return role;
    }

    if let Some(role) = classify_tags(&profile.role_tags) {
        return role;
    }

    if searching_for == Some(RoleCategory::Staff) && profile.department_id.is_some() {
        return RoleCategory::Staff;
    }

    RoleCategory::Other
}

fn classify_username(username: &str) -> Option<RoleCategory> {
    let bytes = username.as_bytes();
    let second_is_digit = bytes.get(1).is_some_and(u8::is_ascii_digit);

    if (bytes.first() == Some(&b'E') && second_is_digit) || username.starts_with("ST") {
        return Some(RoleCategory::Student);
    }

    if (bytes.first() == Some(&b'S') && second_is_digit)
        || username.starts_with("SF")
        || username.to_ascii_lowercase().contains("staff")
    {
        return Some(RoleCategory::Staff);
    }

    None
}

fn classify_tags(tags: &[String]) -> Option<RoleCategory> {
    let has = |name: &str| tags.iter().any(|tag| tag.trim().eq_ignore_ascii_case(name));

    if has("staff") {
        Some(RoleCategory::Staff)
    } else if has("student") {
        Some(RoleCategory::Student)
    } else {
        None
    }
}
