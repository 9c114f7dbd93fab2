//! URL slugs.

use uuid::Uuid;

/// Length of the random disambiguating suffix.
pub const SUFFIX_LENGTH: usize = 12;

/// Lowercases `name` and joins its words with dashes.
///
/// Letters and digits of any script are kept, so "남성 의류" becomes
/// "남성-의류". Other punctuation is dropped. Returns an empty string when
/// nothing usable remains.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    slug
}

/// A short random token for slug collisions.
pub fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..SUFFIX_LENGTH].to_string()
}

/// `base` with a fresh random suffix appended.
pub fn with_random_suffix(base: &str) -> String {
    format!("{base}-{}", random_suffix())
}
