//! Edits to the user-owned fields of a [`BagRecord`].

use serde::Deserialize;

use crate::error::BagError;

use super::models::{BagRecord, QosProfile};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TagAction {
    Add,
    Remove,
}

fn clean<'a>(what: &str, value: &'a str) -> Result<&'a str, BagError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(BagError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(value)
}

/// Adding a tag the bag already carries changes nothing.
pub fn add_tag(record: &mut BagRecord, tag: &str) -> Result<(), BagError> {
    let tag = clean("tag", tag)?;
    if !record.tags.iter().any(|existing| existing == tag) {
        record.tags.push(tag.to_string());
    }
    Ok(())
}

pub fn remove_tag(record: &mut BagRecord, tag: &str) -> Result<(), BagError> {
    let tag = clean("tag", tag)?;
    let before = record.tags.len();
    record.tags.retain(|existing| existing != tag);
    if record.tags.len() == before {
        return Err(BagError::not_found("tag", tag));
    }
    Ok(())
}

pub fn apply_tag(record: &mut BagRecord, tag: &str, action: TagAction) -> Result<(), BagError> {
    match action {
        TagAction::Add => add_tag(record, tag),
        TagAction::Remove => remove_tag(record, tag),
    }
}

/// Sets the QoS override for `topic`, or removes it when `profile` is
/// `None`. Removing an override that does not exist is `NotFound`.
pub fn set_qos(
    record: &mut BagRecord,
    topic: &str,
    profile: Option<QosProfile>,
) -> Result<(), BagError> {
    let topic = clean("topic", topic)?;
    match profile {
        Some(profile) => {
            record.qos_settings.insert(topic.to_string(), profile);
        }
        None => {
            if record.qos_settings.remove(topic).is_none() {
                return Err(BagError::not_found("qos setting", topic));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bags::models::{BagFormat, Durability, ScannedBag};
    use chrono::Utc;

    fn record() -> BagRecord {
        BagRecord::from_scan(ScannedBag {
            path: "/data/run1".into(),
            name: "run1".into(),
            modified_at: Utc::now(),
            discovered_at: Utc::now(),
            size_bytes: 1,
            topics: vec!["/imu".into()],
            duration_text: String::new(),
            message_count: 0,
            format: BagFormat::Db3,
        })
    }

    #[test]
    fn duplicate_tag_is_a_no_op() {
        let mut bag = record();
        add_tag(&mut bag, "urgent").unwrap();
        add_tag(&mut bag, " urgent ").unwrap();
        assert_eq!(bag.tags, ["urgent"]);
    }

    #[test]
    fn removing_an_absent_tag_is_not_found() {
        let mut bag = record();
        apply_tag(&mut bag, "keep", TagAction::Add).unwrap();

        let err = apply_tag(&mut bag, "missing", TagAction::Remove).unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert_eq!(bag.tags, ["keep"]);

        apply_tag(&mut bag, "keep", TagAction::Remove).unwrap();
        assert!(bag.tags.is_empty());
    }

    #[test]
    fn blank_tag_is_rejected() {
        let mut bag = record();
        assert_eq!(add_tag(&mut bag, "  ").unwrap_err().code(), "invalid_argument");
    }

    #[test]
    fn qos_override_is_replaced_then_cleared() {
        let mut bag = record();
        set_qos(&mut bag, "/imu", Some(QosProfile::default())).unwrap();

        let durable = QosProfile {
            durability: Durability::TransientLocal,
            depth: 1,
            ..QosProfile::default()
        };
        set_qos(&mut bag, "/imu", Some(durable.clone())).unwrap();
        assert_eq!(bag.qos_settings.len(), 1);
        assert_eq!(bag.qos_settings["/imu"], durable);

        set_qos(&mut bag, "/imu", None).unwrap();
        assert!(bag.qos_settings.is_empty());
        assert_eq!(set_qos(&mut bag, "/imu", None).unwrap_err().code(), "not_found");
    }
}
