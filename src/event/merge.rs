// Appends module results to an event

use super::{Attribute, Event};
use crate::modules::ResultGroup;

/// Append every returned value as a new attribute and return how many were added.
///
/// Each value is typed with the first type its group declares: modules return
/// untyped values, so there is no way to tell which of several declared types a
/// given value belongs to. Groups that declare no type are skipped. Existing
/// attributes are never touched and nothing is deduplicated. Every new
/// attribute gets its own uuid so later updates of the event do not store it twice.
pub fn merge(event: &mut Event, groups: &[ResultGroup]) -> usize {
    let mut added = 0;

    for group in groups {
        let Some(attr_type) = group.types.first() else {
            tracing::warn!(
                event_id = %event.id,
                values = group.values.len(),
                "Skipping result group without a declared type"
            );
            continue;
        };

        if group.types.len() > 1 {
            tracing::debug!(
                event_id = %event.id,
                declared = ?group.types,
                "Result group declares several types, using {}",
                attr_type
            );
        }

        for value in &group.values {
            event.attributes.push(Attribute::generated(attr_type.clone(), value.clone()));
            added += 1;
        }
    }

    added
}
