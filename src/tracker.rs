//! Decides whether a contact record needs an exposure notification.
//!
//! The decision is read straight off the record each time, so it can be
//! re-run after a failed dispatch and reach the same answer.

use crate::model::ContactDayRecord;

/// True when the record has close contacts the user has not been told about.
pub fn should_notify(record: &ContactDayRecord) -> bool {
    record.unresolved_close_contact_count > 0
}
