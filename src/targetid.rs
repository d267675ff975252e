//! Accelerator processor-id parsing and feature-aware matching.
//!
//! A processor id names a device model plus optional feature tags, e.g.
//! `gfx906`, `sm_80`, `gfx90a:xnack+:sramecc-`. Each feature tag ends in
//! `+` (required on) or `-` (required off).

use std::collections::BTreeMap;

/// Whether `id` begins with a recognized accelerator processor name.
///
/// Used by the entry-id parser to decide if the last `-`-separated segment
/// of an entry id is a processor id rather than a triple component.
pub fn is_recognized_processor(id: &str) -> bool {
    let rest = match id.strip_prefix("gfx").or_else(|| id.strip_prefix("sm_")) {
        Some(rest) => rest,
        None => return false,
    };
    !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Parse `base[:feature±]*` into the processor name and its feature map.
///
/// Returns `None` when a feature segment is empty or does not end in `+`
/// or `-`.
fn parse_target_id(id: &str) -> Option<(&str, BTreeMap<&str, bool>)> {
    let mut segments = id.split(':');
    let processor = segments.next().unwrap_or("");
    let mut features = BTreeMap::new();
    for segment in segments {
        let on = match segment.bytes().last() {
            Some(b'+') => true,
            Some(b'-') => false,
            _ => return None,
        };
        features.insert(&segment[..segment.len() - 1], on);
    }
    Some((processor, features))
}

/// Feature-set-aware processor-id matching.
///
/// `stored` is the id carried by a bundle entry, `requested` the id of the
/// target being looked up. A request without a processor id matches any
/// stored id. Otherwise both must name the same base processor and every
/// feature the stored id pins must be pinned the same way by the request.
pub fn is_compatible_target_id(stored: &str, requested: &str) -> bool {
    if requested.is_empty() {
        return true;
    }
    if stored.is_empty() {
        return false;
    }

    let (stored_proc, stored_features) = match parse_target_id(stored) {
        Some(parsed) => parsed,
        None => return stored == requested,
    };
    let (requested_proc, requested_features) = match parse_target_id(requested) {
        Some(parsed) => parsed,
        None => return stored == requested,
    };

    if stored_proc != requested_proc {
        return false;
    }
    stored_features
        .iter()
        .all(|(name, on)| requested_features.get(name) == Some(on))
}
