#![no_main]

use agent_runner_types::{Label, WorkItem};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json_str) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(item) = serde_json::from_str::<WorkItem>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&item) {
            if let Ok(parsed) = serde_json::from_str::<WorkItem>(&roundtripped) {
                assert_eq!(item.id, parsed.id);
                assert_eq!(item.labels.len(), parsed.labels.len());
            }
        }
    }

    if let Ok(label) = serde_json::from_str::<Label>(json_str) {
        if let Ok(roundtripped) = serde_json::to_string(&label) {
            let parsed: Label = serde_json::from_str(&roundtripped).unwrap();
            assert_eq!(label, parsed);
        }
    }
});
