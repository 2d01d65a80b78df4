//! Case-insensitive quick search over the visible fields of decrypted items.

use crate::models::DecryptedItem;

/// Returns the items whose name, username or URI contains `text`,
/// ignoring case. Blank text matches everything. Order is preserved.
pub fn quick_search<'a>(items: &'a [DecryptedItem], text: &str) -> Vec<&'a DecryptedItem> {
    let needle = text.trim().to_lowercase();
    if needle.is_empty() {
        return items.iter().collect();
    }

    items
        .iter()
        .filter(|item| {
            [item.name(), item.username(), item.uri()]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        })
        .collect()
}
