use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

/// One status entry of a `getEvent` result, dispatched on its `type` field
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceStatus {
    #[serde(rename = "takePicture", rename_all = "camelCase")]
    TakePicture { take_picture_url: Vec<String> },

    #[serde(other)]
    Unrecognized,
}

/// Flatten the per-category result array one level and drop absent entries
pub fn flatten_status(result: &[Value]) -> Vec<&Value> {
    result
        .iter()
        .flat_map(|entry| match entry {
            Value::Array(items) => items.iter().collect::<Vec<_>>(),
            other => vec![other],
        })
        .filter(|entry| !entry.is_null())
        .collect()
}

/// Picture URLs announced by a `getEvent` result
pub fn picture_urls(result: &[Value]) -> Vec<String> {
    let entries = flatten_status(result);
    trace!("Received {} status entries", entries.len());

    entries
        .into_iter()
        .filter_map(|entry| match DeviceStatus::deserialize(entry) {
            Ok(DeviceStatus::TakePicture { take_picture_url }) => {
                take_picture_url.into_iter().next()
            }
            Ok(DeviceStatus::Unrecognized) => None,
            Err(e) => {
                debug!("Ignoring malformed status entry {}: {}", entry, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_take_picture_entry_yields_url() {
        let result = vec![json!(null), json!({"type": "takePicture", "takePictureUrl": ["X"]})];
        assert_eq!(picture_urls(&result), vec!["X".to_string()]);
    }

    #[test]
    fn test_nested_entries_are_flattened() {
        let result = vec![
            json!([{"type": "availableApiList", "names": ["getEvent"]}]),
            json!({"type": "cameraStatus", "cameraStatus": "IDLE"}),
            json!(null),
            json!([null, {"type": "takePicture", "takePictureUrl": ["http://cam/a.jpg", "http://cam/b.jpg"]}]),
        ];

        assert_eq!(flatten_status(&result).len(), 3);
        assert_eq!(picture_urls(&result), vec!["http://cam/a.jpg".to_string()]);
    }

    #[test]
    fn test_unknown_and_malformed_entries_are_ignored() {
        let result = vec![
            json!({"type": "zoomInformation", "zoomPosition": 0}),
            json!({"type": "takePicture"}),
            json!({"noType": true}),
            json!({"type": "takePicture", "takePictureUrl": []}),
        ];
        assert!(picture_urls(&result).is_empty());
    }
}
