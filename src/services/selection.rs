use std::collections::HashSet;

use log::debug;

use crate::core::state::{ChannelType, ReferenceThumbnail, MAX_PER_CATEGORY};

/// How many of a freshly fetched channel's most recent thumbnails are picked.
pub const RECENT_PICK_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    Added,
    Removed,
    /// The thumbnail's category is already full; nothing changed.
    Rejected,
}

/// Adds the thumbnail, or removes it when already selected. Removal never
/// checks the cap; adding to a full category is a silent no-op.
pub fn toggle(
    selected: &mut Vec<ReferenceThumbnail>,
    thumbnail: &ReferenceThumbnail,
) -> SelectionChange {
    if let Some(pos) = selected.iter().position(|r| r.id == thumbnail.id) {
        selected.remove(pos);
        return SelectionChange::Removed;
    }

    let in_category = selected
        .iter()
        .filter(|r| r.channel_type == thumbnail.channel_type)
        .count();
    if in_category >= MAX_PER_CATEGORY {
        debug!(
            "{} selection full ({}), ignoring {}",
            thumbnail.channel_type.label(),
            MAX_PER_CATEGORY,
            thumbnail.id
        );
        return SelectionChange::Rejected;
    }

    selected.push(thumbnail.clone());
    SelectionChange::Added
}

/// Replaces every prior selection from `channel_key` with the first
/// [`RECENT_PICK_COUNT`] of `thumbnails` (recency ordered), then re-applies
/// the per-category cap. Earlier entries win when a category overflows.
/// Returns how many of the new picks survived.
pub fn auto_select_recent(
    selected: &mut Vec<ReferenceThumbnail>,
    thumbnails: &[ReferenceThumbnail],
    channel_key: &str,
) -> usize {
    let mut merged: Vec<ReferenceThumbnail> = selected
        .drain(..)
        .filter(|r| !r.belongs_to(channel_key))
        .collect();
    let kept_before = merged.len();
    merged.extend(thumbnails.iter().take(RECENT_PICK_COUNT).cloned());

    *selected = cap_per_category(merged);
    let picked = selected.len() - kept_before;
    debug!("auto-selected {} recent thumbnails from {}", picked, channel_key);
    picked
}

fn cap_per_category(list: Vec<ReferenceThumbnail>) -> Vec<ReferenceThumbnail> {
    let mut seen = HashSet::new();
    let mut own = 0;
    let mut competitor = 0;

    list.into_iter()
        .filter(|r| {
            if !seen.insert(r.id.clone()) {
                return false;
            }
            let count = match r.channel_type {
                ChannelType::Own => &mut own,
                ChannelType::Competitor => &mut competitor,
            };
            if *count >= MAX_PER_CATEGORY {
                return false;
            }
            *count += 1;
            true
        })
        .collect()
}
